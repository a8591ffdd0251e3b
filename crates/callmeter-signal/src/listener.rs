//! Callee-side invite listener
//!
//! Runs the push and poll delivery paths concurrently and funnels both
//! through one [`InviteResolver`], so a given invite surfaces once.

use crate::channel::SignalChannel;
use crate::resolver::{DeliveryPath, InviteResolution, InviteResolver};
use crate::user_topic;
use callmeter_core::models::{CallInvite, SignalEvent};
use callmeter_core::traits::Subscription;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the listener reports to the callee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// An invite to ring for
    Incoming {
        invite: CallInvite,
        path: DeliveryPath,
    },
    /// The caller withdrew the ringing invite
    Cancelled { from: String, channel_name: String },
}

/// Handle on the running push and poll tasks
pub struct InviteListener {
    user_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl InviteListener {
    /// Start listening for `user_id`'s invites
    ///
    /// The push subscription is established before this returns. If it
    /// cannot be, the listener runs on polling alone.
    pub async fn start(
        user_id: &str,
        channel: Arc<SignalChannel>,
        resolver: Arc<InviteResolver>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ListenerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        match channel.transport().subscribe(&user_topic(user_id)).await {
            Ok(subscription) => {
                tasks.push(tokio::spawn(Self::push_loop(
                    subscription,
                    channel.invite_ttl_secs(),
                    resolver.clone(),
                    tx.clone(),
                    cancel.clone(),
                )));
            }
            Err(e) => {
                warn!(user = %user_id, "Push subscription failed, polling only: {}", e);
            }
        }

        tasks.push(tokio::spawn(Self::poll_loop(
            user_id.to_string(),
            channel,
            resolver,
            poll_interval,
            tx,
            cancel.clone(),
        )));

        info!(user = %user_id, "Invite listener started");
        (
            Self {
                user_id: user_id.to_string(),
                cancel,
                tasks,
            },
            rx,
        )
    }

    /// Stop both delivery paths
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(user = %self.user_id, "Invite listener stopped");
        }
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }

    async fn push_loop(
        mut subscription: Subscription,
        invite_ttl_secs: u64,
        resolver: Arc<InviteResolver>,
        tx: mpsc::UnboundedSender<ListenerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = subscription.recv() => message,
            };
            let Some(message) = message else {
                warn!(topic = %subscription.topic(), "Push topic closed");
                break;
            };

            let event = match SignalEvent::from_parts(&message.event, message.payload) {
                Ok(event) => event,
                Err(e) => {
                    debug!("Ignoring signal message: {}", e);
                    continue;
                }
            };

            match event {
                SignalEvent::Incoming(invite) => {
                    if invite.is_expired(invite_ttl_secs) {
                        debug!(invite = %invite.id, "Pushed invite already expired");
                        continue;
                    }
                    Self::deliver(&resolver, &tx, invite, DeliveryPath::Push);
                }
                SignalEvent::Cancelled { from, channel_name } => {
                    if resolver.release(&channel_name) {
                        let _ = tx.send(ListenerEvent::Cancelled { from, channel_name });
                    }
                }
            }
        }
    }

    async fn poll_loop(
        user_id: String,
        channel: Arc<SignalChannel>,
        resolver: Arc<InviteResolver>,
        poll_interval: Duration,
        tx: mpsc::UnboundedSender<ListenerEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match channel.poll_inbox(&user_id).await {
                Ok(Some(invite)) => Self::deliver(&resolver, &tx, invite, DeliveryPath::Poll),
                Ok(None) => {}
                Err(e) => debug!(user = %user_id, "Inbox poll failed: {}", e),
            }
        }
    }

    fn deliver(
        resolver: &InviteResolver,
        tx: &mpsc::UnboundedSender<ListenerEvent>,
        invite: CallInvite,
        path: DeliveryPath,
    ) {
        if let InviteResolution::Claimed(invite) = resolver.offer(invite, path) {
            info!(channel = %invite.channel_name, from = %invite.from, %path, "Incoming call");
            let _ = tx.send(ListenerEvent::Incoming { invite, path });
        }
    }
}

impl Drop for InviteListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
