//! Call session engine
//!
//! Drives one participant's media session through
//! `idle → connecting → connected ⇄ reconnecting → ended`, with `error`
//! reachable from `connecting` and `reconnecting`.
//!
//! State lives behind a short, non-async critical section. Every async step
//! (media acquisition, credential, join, subscribe) re-checks the session
//! epoch when it completes; `end_call` bumps the epoch so late results are
//! torn down instead of applied.

use callmeter_core::{
    models::{
        CallSession, ConnectionState, EndReason, LocalTracks, SessionKind, SessionParams,
        SessionStatus, SessionTrigger, TrackKind, TransportEvent,
    },
    traits::{JoinedChannel, MediaConnection, MediaTransport, TokenIssuer},
    AppError, AppResult,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::ENGINE_EVENT_CAPACITY;

/// Observable session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A remote participant published and was subscribed
    PeerPresent { participant_id: String },
    /// A subscribed remote participant left
    PeerLeft { participant_id: String },
    /// Payload received on the session data channel
    Data {
        participant_id: String,
        payload: Vec<u8>,
    },
    /// The session ended
    Ended { reason: EndReason },
}

struct EngineState {
    status: SessionStatus,
    epoch: u64,
    joining: bool,
    tracks: Option<LocalTracks>,
    connection: Option<Arc<dyn MediaConnection>>,
    remote: BTreeSet<String>,
    last_error: Option<AppError>,
    end_reason: Option<EndReason>,
    microphone_enabled: bool,
    camera_enabled: bool,
}

impl EngineState {
    /// Apply a trigger through the shared transition table
    fn transition(&mut self, trigger: SessionTrigger) -> AppResult<SessionStatus> {
        let next = self.status.apply(trigger)?;
        self.status = next;
        Ok(next)
    }
}

struct Shared {
    params: SessionParams,
    transport: Arc<dyn MediaTransport>,
    issuer: Arc<dyn TokenIssuer>,
    state: Mutex<EngineState>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

/// Handle on one participant's call session
///
/// Cloning the handle shares the same session.
#[derive(Clone)]
pub struct CallEngine {
    shared: Arc<Shared>,
}

impl CallEngine {
    pub fn new(
        params: SessionParams,
        transport: Arc<dyn MediaTransport>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (events_tx, _) = broadcast::channel(ENGINE_EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                params,
                transport,
                issuer,
                state: Mutex::new(EngineState {
                    status: SessionStatus::Idle,
                    epoch: 0,
                    joining: false,
                    tracks: None,
                    connection: None,
                    remote: BTreeSet::new(),
                    last_error: None,
                    end_reason: None,
                    microphone_enabled: true,
                    camera_enabled: true,
                }),
                status_tx,
                events_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.shared.params
    }

    pub fn channel_name(&self) -> &str {
        &self.shared.params.channel_name
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.state.lock().status
    }

    /// Whether at least one remote participant is subscribed
    pub fn has_remote_peer(&self) -> bool {
        !self.shared.state.lock().remote.is_empty()
    }

    pub fn remote_participants(&self) -> Vec<String> {
        self.shared.state.lock().remote.iter().cloned().collect()
    }

    /// Error retained by the last failed join
    pub fn last_error(&self) -> Option<AppError> {
        self.shared.state.lock().last_error.clone()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.shared.state.lock().end_reason
    }

    pub fn is_microphone_enabled(&self) -> bool {
        self.shared.state.lock().microphone_enabled
    }

    pub fn is_camera_enabled(&self) -> bool {
        self.shared.state.lock().camera_enabled
    }

    /// Snapshot of the session
    pub fn snapshot(&self) -> CallSession {
        let st = self.shared.state.lock();
        let params = &self.shared.params;
        CallSession {
            channel_name: params.channel_name.clone(),
            participant_id: params.participant_id.clone(),
            role: params.role,
            kind: params.kind,
            media: params.media,
            status: st.status,
            remote_participants: st.remote.iter().cloned().collect(),
        }
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Receive session events
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Token cancelled when the session ends
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Join the channel and publish local media
    ///
    /// Returns `Ok(false)` without side effects when a join is already in
    /// flight or the session has moved past `idle`.
    ///
    /// # Errors
    ///
    /// Media, credential and join failures move the session to `error`,
    /// keep the error for [`last_error`](Self::last_error) and return it.
    #[instrument(skip(self), fields(channel = %self.channel_name(), participant = %self.shared.params.participant_id))]
    pub async fn start_call(&self) -> AppResult<bool> {
        let epoch = {
            let mut st = self.shared.state.lock();
            if st.joining || st.status != SessionStatus::Idle {
                debug!(status = %st.status, joining = st.joining, "start_call ignored");
                return Ok(false);
            }
            st.transition(SessionTrigger::Start)?;
            st.joining = true;
            st.epoch
        };
        self.publish_status(SessionStatus::Connecting);

        self.connect(epoch).await
    }

    /// Re-enter `connecting` from `error` with the same parameters
    #[instrument(skip(self), fields(channel = %self.channel_name()))]
    pub async fn retry(&self) -> AppResult<bool> {
        let epoch = {
            let mut st = self.shared.state.lock();
            if st.joining {
                return Ok(false);
            }
            st.transition(SessionTrigger::Retry)?;
            st.joining = true;
            st.last_error = None;
            st.epoch
        };
        info!("Retrying session");
        self.publish_status(SessionStatus::Connecting);

        self.connect(epoch).await
    }

    /// End the session
    ///
    /// Stops and releases local media, leaves the channel and cancels the
    /// session's tasks. Returns `false` if the session had already ended.
    #[instrument(skip(self), fields(channel = %self.channel_name()))]
    pub async fn end_call(&self, reason: EndReason) -> bool {
        let (connection, tracks) = {
            let mut st = self.shared.state.lock();
            if st.status == SessionStatus::Ended {
                return false;
            }
            if st.transition(SessionTrigger::End).is_err() {
                return false;
            }
            st.epoch += 1;
            st.joining = false;
            st.end_reason = Some(reason);
            st.remote.clear();
            (st.connection.take(), st.tracks.take())
        };

        self.shared.cancel.cancel();
        self.publish_status(SessionStatus::Ended);
        let _ = self.shared.events_tx.send(EngineEvent::Ended { reason });

        self.release(connection, tracks).await;
        info!(%reason, "Session ended");
        true
    }

    /// Mute or unmute the microphone
    pub async fn set_microphone_enabled(&self, enabled: bool) -> AppResult<()> {
        let connection = self.live_connection()?;
        connection.set_track_enabled(TrackKind::Audio, enabled).await?;
        self.shared.state.lock().microphone_enabled = enabled;
        debug!(enabled, "Microphone toggled");
        Ok(())
    }

    /// Turn the camera on or off (video sessions only)
    pub async fn set_camera_enabled(&self, enabled: bool) -> AppResult<()> {
        if !self.shared.params.media.tracks().contains(&TrackKind::Video) {
            return Err(AppError::Validation(
                "Camera toggle requires a video session".to_string(),
            ));
        }
        let connection = self.live_connection()?;
        connection.set_track_enabled(TrackKind::Video, enabled).await?;
        self.shared.state.lock().camera_enabled = enabled;
        debug!(enabled, "Camera toggled");
        Ok(())
    }

    /// Send a payload on the session data channel
    pub async fn send_data(&self, payload: &[u8]) -> AppResult<()> {
        let connection = self.live_connection()?;
        connection.send_data(payload).await
    }

    fn live_connection(&self) -> AppResult<Arc<dyn MediaConnection>> {
        let st = self.shared.state.lock();
        st.connection.clone().ok_or_else(|| {
            AppError::Media(format!("Session is {}, no live connection", st.status))
        })
    }

    fn publish_status(&self, status: SessionStatus) {
        self.shared.status_tx.send_replace(status);
    }

    async fn connect(&self, epoch: u64) -> AppResult<bool> {
        match self.join_channel().await {
            Err(e) => {
                {
                    let mut st = self.shared.state.lock();
                    if st.epoch != epoch || st.status != SessionStatus::Connecting {
                        debug!("Join failed after session was torn down");
                        return Ok(false);
                    }
                    st.joining = false;
                    st.transition(SessionTrigger::Fail)?;
                    st.last_error = Some(e.clone());
                }
                error!(error = %e, "Failed to join session");
                self.publish_status(SessionStatus::Error);
                Err(e)
            }
            Ok((tracks, joined)) => {
                // publish is best-effort: the session still counts as connected
                if let Err(e) = joined.connection.publish(&tracks).await {
                    warn!(error = %e, "Failed to publish local tracks");
                }

                let stale = {
                    let mut st = self.shared.state.lock();
                    if st.epoch != epoch || st.status != SessionStatus::Connecting {
                        true
                    } else {
                        st.joining = false;
                        st.tracks = Some(tracks.clone());
                        st.connection = Some(joined.connection.clone());
                        st.transition(SessionTrigger::Joined)?;
                        false
                    }
                };

                if stale {
                    info!("Join completed after session ended, tearing down");
                    self.release(Some(joined.connection), Some(tracks)).await;
                    return Ok(false);
                }

                self.publish_status(SessionStatus::Connected);
                info!("Session connected");
                self.spawn_event_pump(epoch, joined.events);
                Ok(true)
            }
        }
    }

    /// Acquire media, obtain a credential and join; releases media on failure
    async fn join_channel(&self) -> AppResult<(LocalTracks, JoinedChannel)> {
        let params = &self.shared.params;
        let transport = &self.shared.transport;

        let tracks = transport.create_local_tracks(params.media).await?;

        let credential = match self
            .shared
            .issuer
            .issue_join_credential(&params.channel_name, &params.participant_id)
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                self.release(None, Some(tracks)).await;
                return Err(e);
            }
        };

        match transport
            .join(&credential, &params.channel_name, &params.participant_id)
            .await
        {
            Ok(joined) => Ok((tracks, joined)),
            Err(e) => {
                self.release(None, Some(tracks)).await;
                Err(e)
            }
        }
    }

    async fn release(
        &self,
        connection: Option<Arc<dyn MediaConnection>>,
        tracks: Option<LocalTracks>,
    ) {
        if let Some(tracks) = tracks {
            if let Err(e) = self.shared.transport.release_local_tracks(&tracks).await {
                warn!(error = %e, "Failed to release local tracks");
            }
        }
        if let Some(connection) = connection {
            if let Err(e) = connection.leave().await {
                warn!(error = %e, "Failed to leave channel");
            }
        }
    }

    fn spawn_event_pump(&self, epoch: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let engine = self.clone();
        let cancel = self.shared.cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    debug!("Transport event stream closed");
                    break;
                };
                if !engine.handle_transport_event(epoch, event).await {
                    break;
                }
            }
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        let st = self.shared.state.lock();
        st.epoch == epoch && st.status.is_live()
    }

    /// Apply one transport event; returns `false` once the pump should stop
    async fn handle_transport_event(&self, epoch: u64, event: TransportEvent) -> bool {
        if !self.is_current(epoch) {
            return false;
        }

        match event {
            TransportEvent::ParticipantPublished {
                participant_id,
                track,
            } => self.on_published(epoch, participant_id, track).await,
            TransportEvent::ParticipantUnpublished {
                participant_id,
                track,
            } => {
                debug!(participant = %participant_id, ?track, "Remote track unpublished");
            }
            TransportEvent::ParticipantLeft { participant_id } => {
                self.on_participant_left(participant_id).await;
            }
            TransportEvent::ConnectionStateChanged(state) => {
                self.on_connection_state(epoch, state).await;
            }
            TransportEvent::DataReceived {
                participant_id,
                payload,
            } => {
                let _ = self.shared.events_tx.send(EngineEvent::Data {
                    participant_id,
                    payload,
                });
            }
        }

        self.is_current(epoch)
    }

    async fn on_published(&self, epoch: u64, participant_id: String, track: TrackKind) {
        let connection = {
            let st = self.shared.state.lock();
            match &st.connection {
                Some(connection) => connection.clone(),
                None => return,
            }
        };

        if let Err(e) = connection.subscribe(&participant_id, track).await {
            warn!(participant = %participant_id, ?track, error = %e, "Failed to subscribe");
            return;
        }

        let newly_present = {
            let mut st = self.shared.state.lock();
            st.epoch == epoch && st.status.is_live() && st.remote.insert(participant_id.clone())
        };

        if newly_present {
            info!(participant = %participant_id, "Remote participant present");
            let _ = self
                .shared
                .events_tx
                .send(EngineEvent::PeerPresent { participant_id });
        }
    }

    async fn on_participant_left(&self, participant_id: String) {
        let (removed, sole_peer_gone) = {
            let mut st = self.shared.state.lock();
            let removed = st.remote.remove(&participant_id);
            let private = self.shared.params.kind == SessionKind::Private;
            (removed, private && removed && st.remote.is_empty())
        };

        if removed {
            info!(participant = %participant_id, "Remote participant left");
            let _ = self
                .shared
                .events_tx
                .send(EngineEvent::PeerLeft { participant_id });
        }

        if sole_peer_gone {
            self.end_call(EndReason::PeerLeft).await;
        }
    }

    async fn on_connection_state(&self, epoch: u64, state: ConnectionState) {
        let (next, teardown) = {
            let mut st = self.shared.state.lock();
            if st.epoch != epoch {
                return;
            }
            match (st.status, state) {
                (
                    SessionStatus::Connected,
                    ConnectionState::Reconnecting | ConnectionState::Disconnected,
                ) => match st.transition(SessionTrigger::ConnectionLost) {
                    Ok(next) => (next, None),
                    Err(_) => return,
                },
                (SessionStatus::Reconnecting, ConnectionState::Connected) => {
                    match st.transition(SessionTrigger::Reconnected) {
                        Ok(next) => (next, None),
                        Err(_) => return,
                    }
                }
                (SessionStatus::Reconnecting, ConnectionState::Disconnected) => {
                    match st.transition(SessionTrigger::Fail) {
                        Ok(next) => {
                            st.epoch += 1;
                            st.remote.clear();
                            st.last_error = Some(AppError::TransientNetwork(
                                "Connection lost while reconnecting".to_string(),
                            ));
                            (next, Some((st.connection.take(), st.tracks.take())))
                        }
                        Err(_) => return,
                    }
                }
                _ => return,
            }
        };

        match next {
            SessionStatus::Reconnecting => warn!("Connection lost, reconnecting"),
            SessionStatus::Connected => info!("Connection restored"),
            SessionStatus::Error => error!("Reconnection failed"),
            _ => {}
        }
        self.publish_status(next);

        if let Some((connection, tracks)) = teardown {
            self.release(connection, tracks).await;
        }
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("channel_name", &self.shared.params.channel_name)
            .field("participant_id", &self.shared.params.participant_id)
            .field("status", &self.status())
            .finish()
    }
}
