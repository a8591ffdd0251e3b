//! Signal channel: invite notification, inbox polling and cancellation

use crate::user_topic;
use callmeter_core::{
    models::{CallInvite, InviteRequest, SignalEvent},
    traits::{InviteStore, SignalTransport},
    AppError, AppResult,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of `notify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub invite: CallInvite,
    /// Invite reached the callee's inbox
    pub stored: bool,
    /// `incoming` event published on the callee's topic
    pub pushed: bool,
}

/// Invite delivery over push (topic) and poll (inbox)
pub struct SignalChannel {
    transport: Arc<dyn SignalTransport>,
    store: Arc<dyn InviteStore>,
    invite_ttl_secs: u64,
}

impl SignalChannel {
    pub fn new(
        transport: Arc<dyn SignalTransport>,
        store: Arc<dyn InviteStore>,
        invite_ttl_secs: u64,
    ) -> Self {
        Self {
            transport,
            store,
            invite_ttl_secs,
        }
    }

    pub fn transport(&self) -> &Arc<dyn SignalTransport> {
        &self.transport
    }

    pub fn invite_ttl_secs(&self) -> u64 {
        self.invite_ttl_secs
    }

    /// Store an invite in the target's inbox and push `incoming`
    ///
    /// Either path alone is enough for the callee to see the invite, so a
    /// failure of one is logged and reported in the outcome. Fails only when
    /// both paths fail.
    #[instrument(skip(self, request), fields(from = %request.from, channel = %request.channel_name))]
    pub async fn notify(&self, target_id: &str, request: InviteRequest) -> AppResult<NotifyOutcome> {
        let invite = CallInvite::new(target_id, request);

        let stored = self.store.put(&invite, self.invite_ttl_secs).await;
        if let Err(e) = &stored {
            warn!(callee = %target_id, "Failed to store invite: {}", e);
        }

        let pushed = self.publish(target_id, &SignalEvent::Incoming(invite.clone())).await;
        if let Err(e) = &pushed {
            warn!(callee = %target_id, "Push failed, relying on poll: {}", e);
        }

        match (stored, pushed) {
            (Err(e), Err(_)) => Err(e),
            (stored, pushed) => {
                info!(callee = %target_id, invite = %invite.id, "Invite sent");
                Ok(NotifyOutcome {
                    invite,
                    stored: stored.is_ok(),
                    pushed: pushed.is_ok(),
                })
            }
        }
    }

    /// Latest live invite in the target's inbox
    pub async fn poll_inbox(&self, target_id: &str) -> AppResult<Option<CallInvite>> {
        let Some(invite) = self.store.latest(target_id).await? else {
            return Ok(None);
        };
        match invite.ensure_live(self.invite_ttl_secs) {
            Ok(()) => Ok(Some(invite)),
            Err(AppError::InviteExpired(id)) => {
                debug!(callee = %target_id, invite = %id, "Dropping expired invite");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Withdraw whatever invite is pending for `target_id`
    ///
    /// Returns the withdrawn invite, if any.
    #[instrument(skip(self))]
    pub async fn cancel(&self, target_id: &str) -> AppResult<Option<CallInvite>> {
        let Some(invite) = self.store.latest(target_id).await? else {
            return Ok(None);
        };
        self.cancel_channel(target_id, &invite.from, &invite.channel_name)
            .await?;
        Ok(Some(invite))
    }

    /// Withdraw the invite for `channel_name` and tell the callee
    ///
    /// The inbox is only cleared when it still holds that channel's invite.
    pub async fn cancel_channel(
        &self,
        target_id: &str,
        from: &str,
        channel_name: &str,
    ) -> AppResult<()> {
        self.resolve(target_id, channel_name).await?;

        let event = SignalEvent::Cancelled {
            from: from.to_string(),
            channel_name: channel_name.to_string(),
        };
        if let Err(e) = self.publish(target_id, &event).await {
            warn!(callee = %target_id, channel = %channel_name, "Failed to push cancel: {}", e);
        }
        Ok(())
    }

    /// Reject the invite for `channel_name`
    ///
    /// Clears the callee's inbox like a cancel, then publishes `cancelled`
    /// on the caller's topic so the ringing caller can hang up.
    #[instrument(skip(self))]
    pub async fn decline(
        &self,
        callee_id: &str,
        caller_id: &str,
        channel_name: &str,
    ) -> AppResult<()> {
        self.cancel_channel(callee_id, caller_id, channel_name)
            .await?;

        let event = SignalEvent::Cancelled {
            from: callee_id.to_string(),
            channel_name: channel_name.to_string(),
        };
        if let Err(e) = self.publish(caller_id, &event).await {
            warn!(caller = %caller_id, channel = %channel_name, "Failed to push decline: {}", e);
        }
        Ok(())
    }

    /// Clear the inbox entry for `channel_name` after accept, reject or end
    pub async fn resolve(&self, target_id: &str, channel_name: &str) -> AppResult<bool> {
        self.store.clear_if(target_id, channel_name).await
    }

    async fn publish(&self, target_id: &str, event: &SignalEvent) -> AppResult<()> {
        self.transport
            .publish(&user_topic(target_id), event.name(), event.payload()?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryInviteStore, SignalHub};
    use callmeter_core::models::MediaKind;
    use callmeter_core::traits::{MockInviteStore, MockSignalTransport};

    fn request(channel: &str) -> InviteRequest {
        InviteRequest {
            from: "alice".to_string(),
            kind: MediaKind::Video,
            channel_name: channel.to_string(),
        }
    }

    fn channel_with_hub() -> (SignalChannel, SignalHub) {
        let hub = SignalHub::default();
        let channel = SignalChannel::new(
            Arc::new(hub.clone()),
            Arc::new(MemoryInviteStore::new()),
            60,
        );
        (channel, hub)
    }

    #[tokio::test]
    async fn test_notify_stores_and_pushes() {
        let (channel, hub) = channel_with_hub();
        let mut sub = hub.subscribe("user:bob").await.unwrap();

        let outcome = channel.notify("bob", request("c1")).await.unwrap();
        assert!(outcome.stored);
        assert!(outcome.pushed);

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.event, "incoming");
        let pushed = SignalEvent::from_parts(&msg.event, msg.payload).unwrap();
        assert_eq!(pushed, SignalEvent::Incoming(outcome.invite.clone()));

        assert_eq!(channel.poll_inbox("bob").await.unwrap(), Some(outcome.invite));
    }

    #[tokio::test]
    async fn test_push_failure_is_not_fatal() {
        let mut transport = MockSignalTransport::new();
        transport
            .expect_publish()
            .returning(|_, _, _| Err(AppError::TransientNetwork("down".to_string())));

        let channel = SignalChannel::new(
            Arc::new(transport),
            Arc::new(MemoryInviteStore::new()),
            60,
        );

        let outcome = channel.notify("bob", request("c1")).await.unwrap();
        assert!(!outcome.pushed);
        assert!(outcome.stored);
        assert!(channel.poll_inbox("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_notify_fails_when_both_paths_fail() {
        let mut transport = MockSignalTransport::new();
        transport
            .expect_publish()
            .returning(|_, _, _| Err(AppError::TransientNetwork("down".to_string())));
        let mut store = MockInviteStore::new();
        store
            .expect_put()
            .returning(|_, _| Err(AppError::TransientNetwork("down".to_string())));

        let channel = SignalChannel::new(Arc::new(transport), Arc::new(store), 60);
        assert!(channel.notify("bob", request("c1")).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_clears_and_publishes() {
        let (channel, hub) = channel_with_hub();
        channel.notify("bob", request("c1")).await.unwrap();
        let mut sub = hub.subscribe("user:bob").await.unwrap();

        let cancelled = channel.cancel("bob").await.unwrap();
        assert_eq!(cancelled.map(|i| i.channel_name), Some("c1".to_string()));
        assert_eq!(channel.poll_inbox("bob").await.unwrap(), None);

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.event, "cancelled");
        assert_eq!(msg.payload["channel_name"], "c1");
    }

    #[tokio::test]
    async fn test_decline_tells_the_caller() {
        let (channel, hub) = channel_with_hub();
        channel.notify("bob", request("c1")).await.unwrap();
        let mut caller = hub.subscribe("user:alice").await.unwrap();

        channel.decline("bob", "alice", "c1").await.unwrap();
        assert_eq!(channel.poll_inbox("bob").await.unwrap(), None);

        let msg = caller.recv().await.unwrap();
        assert_eq!(
            SignalEvent::from_parts(&msg.event, msg.payload).unwrap(),
            SignalEvent::Cancelled {
                from: "bob".to_string(),
                channel_name: "c1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_keeps_newer_invite() {
        let (channel, _hub) = channel_with_hub();
        channel.notify("bob", request("c1")).await.unwrap();
        channel.notify("bob", request("c2")).await.unwrap();

        assert!(!channel.resolve("bob", "c1").await.unwrap());
        assert!(channel.poll_inbox("bob").await.unwrap().is_some());
        assert!(channel.resolve("bob", "c2").await.unwrap());
        assert!(channel.poll_inbox("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_is_one_compare_and_clear() {
        let mut store = MockInviteStore::new();
        store.expect_latest().never();
        store.expect_clear().never();
        store
            .expect_clear_if()
            .withf(|target, channel| target == "bob" && channel == "c1")
            .times(1)
            .returning(|_, _| Ok(true));

        let channel = SignalChannel::new(Arc::new(SignalHub::default()), Arc::new(store), 60);
        assert!(channel.resolve("bob", "c1").await.unwrap());
    }
}
