//! Call coordination
//!
//! An [`ActiveCall`] binds one [`CallEngine`], its billing loop and its
//! consent workflow to one channel, and forwards everything the UI needs as
//! [`CallNotice`]s. The [`CallCoordinator`] creates calls for one local
//! participant and keeps a registry of the ones still running.

use callmeter_core::{
    config::{BillingConfig, ConsentConfig},
    models::{
        CallInvite, ConsentState, EndReason, HostRates, InviteRequest, MediaKind,
        ParticipantRole, SessionParams, SessionStatus, SignalEvent,
    },
    traits::{
        MediaRecorder, MediaTransport, SignalMessage, StorageUploader, Subscription, TokenIssuer,
        WalletLedger,
    },
    AppError, AppResult,
};
use callmeter_signal::{user_topic, InviteResolver, SignalChannel};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::time::{interval, sleep};
use tracing::{debug, info, instrument, warn};

use crate::billing::{BillingMeter, BillingPlan, MeterSnapshot, SessionProbe};
use crate::consent::{ConsentWorkflow, DataChannel};
use crate::constants::{CONSENT_CHECK_INTERVAL_SECS, NOTICE_CAPACITY};
use crate::engine::{CallEngine, EngineEvent};
use crate::notice::CallNotice;

/// Collaborators shared by every call of one participant
#[derive(Clone)]
pub struct CallServices {
    pub transport: Arc<dyn MediaTransport>,
    pub issuer: Arc<dyn TokenIssuer>,
    pub ledger: Arc<dyn WalletLedger>,
    pub signal: Arc<SignalChannel>,
    pub recorder: Option<Arc<dyn MediaRecorder>>,
    pub uploader: Option<Arc<dyn StorageUploader>>,
}

/// Host a room viewer pays, when room billing is enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomHost {
    pub host_id: String,
    pub rates: HostRates,
}

type Registry = Arc<RwLock<HashMap<String, ActiveCall>>>;

/// Inbox bookkeeping done when a call finishes
enum InviteCleanup {
    /// Caller side: withdraw the invite from the callee's inbox
    Withdraw { callee_id: String },
    /// Callee side: clear our inbox and release the resolver guard
    Resolve { resolver: Arc<InviteResolver> },
    None,
}

struct CallInner {
    local_id: String,
    remote_id: Option<String>,
    engine: CallEngine,
    consent: Mutex<ConsentWorkflow>,
    meter: Option<Arc<BillingMeter>>,
    notices: broadcast::Sender<CallNotice>,
    signal: Arc<SignalChannel>,
    cleanup: InviteCleanup,
    registry: Registry,
    finished: OnceCell<EndReason>,
}

/// Handle on one running call
#[derive(Clone)]
pub struct ActiveCall {
    inner: Arc<CallInner>,
}

impl ActiveCall {
    pub fn channel_name(&self) -> &str {
        self.inner.engine.channel_name()
    }

    pub fn role(&self) -> ParticipantRole {
        self.inner.engine.params().role
    }

    /// The other party of a private call
    pub fn remote_id(&self) -> Option<&str> {
        self.inner.remote_id.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.engine.status()
    }

    pub fn engine(&self) -> &CallEngine {
        &self.inner.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallNotice> {
        self.inner.notices.subscribe()
    }

    /// Billing counters, if this side pays
    pub fn billing(&self) -> Option<MeterSnapshot> {
        self.inner.meter.as_ref().map(|m| m.snapshot())
    }

    /// Reason the call finished, once cleanup has run
    pub fn finished(&self) -> Option<EndReason> {
        self.inner.finished.get().copied()
    }

    /// Join the channel; failures are also published as notices
    pub async fn start(&self) -> AppResult<bool> {
        self.inner
            .engine
            .start_call()
            .await
            .map_err(|e| self.report(e))
    }

    /// Retry after the engine reported an error
    pub async fn retry(&self) -> AppResult<bool> {
        self.inner.engine.retry().await.map_err(|e| self.report(e))
    }

    /// Hang up
    ///
    /// Returns `false` if the call had already ended. Cleanup has completed
    /// when this returns either way.
    #[instrument(skip(self), fields(channel = %self.channel_name()))]
    pub async fn end(&self) -> bool {
        self.end_with(EndReason::Hangup).await
    }

    async fn end_with(&self, reason: EndReason) -> bool {
        let ended = self.inner.engine.end_call(reason).await;
        let reason = self.inner.engine.end_reason().unwrap_or(reason);
        self.inner.finish(reason).await;
        ended
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> AppResult<()> {
        self.inner.engine.set_microphone_enabled(enabled).await
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> AppResult<()> {
        self.inner.engine.set_camera_enabled(enabled).await
    }

    pub async fn consent_state(&self) -> ConsentState {
        self.inner.consent.lock().await.state()
    }

    /// Ask the other party for permission to record
    pub async fn request_recording(&self) -> AppResult<()> {
        self.inner.consent.lock().await.request().await
    }

    /// Answer the other party's recording request
    pub async fn respond_recording(&self, approve: bool) -> AppResult<()> {
        self.inner.consent.lock().await.respond(approve).await
    }

    /// Take back a recording permission given earlier
    pub async fn withdraw_recording_consent(&self) -> AppResult<()> {
        self.inner.consent.lock().await.withdraw().await
    }

    /// Stop recording and return the stored URL
    pub async fn stop_recording(&self) -> AppResult<Option<String>> {
        self.inner
            .consent
            .lock()
            .await
            .stop_recording()
            .await
            .map_err(|e| self.report(e))
    }

    fn report(&self, err: AppError) -> AppError {
        let _ = self.inner.notices.send(CallNotice::error(&err));
        err
    }

    fn spawn_tasks(&self, tick: Duration) {
        let engine = &self.inner.engine;
        let cancel = engine.cancellation_token();

        // status → notices
        let mut status_rx = engine.subscribe_status();
        let notices = self.inner.notices.clone();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                let _ = notices.send(CallNotice::StatusChanged { status });
                if status == SessionStatus::Ended {
                    break;
                }
            }
        });

        // engine events → consent, cleanup
        let mut events = engine.subscribe_events();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::Data { payload, .. }) => {
                        inner.consent.lock().await.on_payload(&payload).await;
                    }
                    Ok(EngineEvent::Ended { reason }) => {
                        inner.finish(reason).await;
                        break;
                    }
                    Ok(event) => debug!(?event, "Engine event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Engine events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(meter) = &self.inner.meter {
            let probe: Arc<dyn SessionProbe> = Arc::new(engine.clone());
            meter
                .clone()
                .spawn(probe, tick, cancel.clone(), self.inner.notices.clone());
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(CONSENT_CHECK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.consent.lock().await.expire_pending(Utc::now());
                    }
                }
            }
        });
    }

    /// Give up ringing once the callee declines or the invite lapses
    ///
    /// Stops watching as soon as a remote participant is present.
    fn spawn_ring_timeout(&self, ring_for: Duration, mut replies: Option<Subscription>) {
        let call = self.clone();
        let cancel = self.inner.engine.cancellation_token();
        let mut events = self.inner.engine.subscribe_events();
        if self.inner.engine.has_remote_peer() {
            return;
        }

        tokio::spawn(async move {
            let deadline = sleep(ring_for);
            tokio::pin!(deadline);
            let channel = call.channel_name().to_string();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = &mut deadline => {
                        info!(%channel, "Invite went unanswered");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(EngineEvent::PeerPresent { .. }) => return,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    message = next_reply(&mut replies) => match message {
                        Some(message) if is_decline(&message, &channel) => {
                            info!(%channel, "Invite declined");
                            break;
                        }
                        Some(_) => {}
                        None => replies = None,
                    },
                }
            }

            if !call.inner.engine.has_remote_peer() {
                call.end_with(EndReason::Rejected).await;
            }
        });
    }
}

async fn next_reply(replies: &mut Option<Subscription>) -> Option<SignalMessage> {
    match replies {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

fn is_decline(message: &SignalMessage, channel_name: &str) -> bool {
    matches!(
        SignalEvent::from_parts(&message.event, message.payload.clone()),
        Ok(SignalEvent::Cancelled { channel_name: declined, .. }) if declined == channel_name
    )
}

impl CallInner {
    /// Run end-of-call cleanup exactly once; concurrent callers wait for it
    async fn finish(&self, reason: EndReason) -> EndReason {
        *self
            .finished
            .get_or_init(|| async move {
                if let Some(meter) = &self.meter {
                    meter.stop();
                }
                self.consent.lock().await.on_session_end().await;

                let channel = self.engine.channel_name();
                match &self.cleanup {
                    InviteCleanup::Withdraw { callee_id } => {
                        if let Err(e) = self
                            .signal
                            .cancel_channel(callee_id, &self.local_id, channel)
                            .await
                        {
                            warn!(callee = %callee_id, error = %e, "Failed to withdraw invite");
                        }
                    }
                    InviteCleanup::Resolve { resolver } => {
                        if let Err(e) = self.signal.resolve(&self.local_id, channel).await {
                            warn!(error = %e, "Failed to clear inbox");
                        }
                        resolver.release(channel);
                    }
                    InviteCleanup::None => {}
                }

                self.registry.write().remove(channel);
                let _ = self.notices.send(CallNotice::Ended { reason });
                info!(%channel, %reason, "Call finished");
                reason
            })
            .await
    }
}

impl std::fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCall")
            .field("channel_name", &self.channel_name())
            .field("role", &self.role())
            .field("status", &self.status())
            .finish()
    }
}

/// Creates and tracks the calls of one local participant
pub struct CallCoordinator {
    local_id: String,
    services: CallServices,
    resolver: Arc<InviteResolver>,
    billing: BillingConfig,
    consent: ConsentConfig,
    active: Registry,
}

impl CallCoordinator {
    pub fn new(
        local_id: impl Into<String>,
        services: CallServices,
        resolver: Arc<InviteResolver>,
        billing: BillingConfig,
        consent: ConsentConfig,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            services,
            resolver,
            billing,
            consent,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn resolver(&self) -> &Arc<InviteResolver> {
        &self.resolver
    }

    /// Calls that have not finished yet
    pub fn active_calls(&self) -> Vec<ActiveCall> {
        self.active.read().values().cloned().collect()
    }

    pub fn get(&self, channel_name: &str) -> Option<ActiveCall> {
        self.active.read().get(channel_name).cloned()
    }

    /// Call `callee_id` and bill this participant at the callee's rates
    ///
    /// The call is returned even when joining fails, in `error` status so
    /// it can be retried or ended.
    ///
    /// # Errors
    ///
    /// Only when neither invite delivery path accepts the invite.
    #[instrument(skip(self, rates), fields(caller = %self.local_id))]
    pub async fn place_call(
        &self,
        callee_id: &str,
        media: MediaKind,
        rates: HostRates,
    ) -> AppResult<ActiveCall> {
        let channel_name = CallInvite::channel_for(&self.local_id, callee_id);

        // subscribe before the callee can see the invite and decline it
        let replies = match self
            .services
            .signal
            .transport()
            .subscribe(&user_topic(&self.local_id))
            .await
        {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(error = %e, "Cannot watch for declines, relying on ring timeout");
                None
            }
        };

        let outcome = self
            .services
            .signal
            .notify(
                callee_id,
                InviteRequest {
                    from: self.local_id.clone(),
                    kind: media,
                    channel_name: channel_name.clone(),
                },
            )
            .await?;
        debug!(stored = outcome.stored, pushed = outcome.pushed, "Callee notified");

        let params = SessionParams::private(
            &channel_name,
            &self.local_id,
            ParticipantRole::Caller,
            media,
        );
        let plan = BillingPlan {
            payer_id: self.local_id.clone(),
            payee_id: callee_id.to_string(),
            media,
            rates,
            billable: params.is_billable(self.billing.bill_room_sessions),
        };

        let call = self.open(
            params,
            Some(callee_id.to_string()),
            Some(plan),
            InviteCleanup::Withdraw {
                callee_id: callee_id.to_string(),
            },
        );
        call.spawn_ring_timeout(
            Duration::from_secs(self.services.signal.invite_ttl_secs()),
            replies,
        );
        let _ = call.start().await;
        Ok(call)
    }

    /// Accept a delivered invite
    ///
    /// # Errors
    ///
    /// `InviteExpired` for stale invites, `Validation` when already engaged
    /// on another channel.
    #[instrument(skip(self, invite), fields(callee = %self.local_id, channel = %invite.channel_name))]
    pub async fn accept(&self, invite: &CallInvite) -> AppResult<ActiveCall> {
        invite.ensure_live(self.services.signal.invite_ttl_secs())?;

        if !self.resolver.hold(invite) {
            return Err(AppError::Validation(format!(
                "Busy on {}",
                self.resolver.active_channel().unwrap_or_default()
            )));
        }
        if let Some(call) = self.get(&invite.channel_name) {
            debug!("Invite already accepted");
            return Ok(call);
        }

        if let Err(e) = self
            .services
            .signal
            .resolve(&self.local_id, &invite.channel_name)
            .await
        {
            warn!(error = %e, "Failed to clear inbox on accept");
        }

        let params = SessionParams::private(
            &invite.channel_name,
            &self.local_id,
            ParticipantRole::Callee,
            invite.kind,
        );
        let call = self.open(
            params,
            Some(invite.from.clone()),
            None,
            InviteCleanup::Resolve {
                resolver: self.resolver.clone(),
            },
        );
        let _ = call.start().await;
        Ok(call)
    }

    /// Decline a delivered invite; the caller's call ends as rejected
    #[instrument(skip(self, invite), fields(callee = %self.local_id, channel = %invite.channel_name))]
    pub async fn reject(&self, invite: &CallInvite) -> AppResult<()> {
        self.services
            .signal
            .decline(&self.local_id, &invite.from, &invite.channel_name)
            .await?;
        self.resolver.release(&invite.channel_name);
        info!(from = %invite.from, "Invite rejected");
        Ok(())
    }

    /// Join a room as its owner or as a viewer
    ///
    /// Viewers are billed only when room billing is enabled and a host is
    /// given.
    #[instrument(skip(self, host), fields(participant = %self.local_id))]
    pub async fn join_room(
        &self,
        channel_name: &str,
        role: ParticipantRole,
        media: MediaKind,
        host: Option<RoomHost>,
    ) -> AppResult<ActiveCall> {
        if !matches!(role, ParticipantRole::RoomOwner | ParticipantRole::Viewer) {
            return Err(AppError::Validation(format!(
                "Role {} cannot join a room",
                role
            )));
        }

        let params = SessionParams::room(channel_name, &self.local_id, role, media);
        let billable = params.is_billable(self.billing.bill_room_sessions);
        let plan = match (role, host) {
            (ParticipantRole::Viewer, Some(host)) => Some(BillingPlan {
                payer_id: self.local_id.clone(),
                payee_id: host.host_id,
                media,
                rates: host.rates,
                billable,
            }),
            _ => None,
        };

        let call = self.open(params, None, plan, InviteCleanup::None);
        let _ = call.start().await;
        Ok(call)
    }

    fn open(
        &self,
        params: SessionParams,
        remote_id: Option<String>,
        plan: Option<BillingPlan>,
        cleanup: InviteCleanup,
    ) -> ActiveCall {
        let engine = CallEngine::new(
            params,
            self.services.transport.clone(),
            self.services.issuer.clone(),
        );
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let data: Arc<dyn DataChannel> = Arc::new(engine.clone());
        let mut consent = ConsentWorkflow::new(
            &self.local_id,
            engine.channel_name(),
            data,
            notices.clone(),
            self.consent.response_timeout_secs,
        );
        if let (Some(recorder), Some(uploader)) =
            (self.services.recorder.clone(), self.services.uploader.clone())
        {
            consent = consent.with_storage(recorder, uploader);
        }

        let meter =
            plan.map(|plan| Arc::new(BillingMeter::new(plan, self.services.ledger.clone())));

        let call = ActiveCall {
            inner: Arc::new(CallInner {
                local_id: self.local_id.clone(),
                remote_id,
                engine,
                consent: Mutex::new(consent),
                meter,
                notices,
                signal: self.services.signal.clone(),
                cleanup,
                registry: self.active.clone(),
                finished: OnceCell::new(),
            }),
        };

        call.spawn_tasks(Duration::from_millis(self.billing.tick_interval_ms));
        self.active
            .write()
            .insert(call.channel_name().to_string(), call.clone());
        call
    }
}
