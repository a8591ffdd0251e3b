//! Collaborator contracts
//!
//! The coordinator talks to everything outside its core through these narrow
//! traits: the media transport, the token issuer, the wallet ledger, the
//! signal transport and inbox, the recorder and the storage uploader.

use crate::error::AppError;
use crate::models::{
    CallInvite, JoinCredential, LocalTracks, MediaKind, RecordingArtifact, SplitReceipt,
    TrackKind, TransportEvent, WalletBalance,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wallet ledger contract
///
/// Every operation is atomic. A debit that would make a balance negative is
/// rejected with `AppError::InsufficientFunds` and leaves the balance intact.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Read the current balance
    async fn balance(&self, account_id: &str) -> Result<WalletBalance, AppError>;

    /// Add `amount` to an account, creating it if absent; returns the new balance
    async fn credit(&self, account_id: &str, amount: i64) -> Result<i64, AppError>;

    /// Remove `amount` from an account; returns the new balance
    async fn debit(&self, account_id: &str, amount: i64) -> Result<i64, AppError>;

    /// Debit the payer `amount` and credit the payee its share in one transaction
    async fn split_pay(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
    ) -> Result<SplitReceipt, AppError>;
}

/// A joined channel: the connection plus its event stream
pub struct JoinedChannel {
    pub connection: Arc<dyn MediaConnection>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for JoinedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedChannel").finish_non_exhaustive()
    }
}

/// Media transport contract (SDK performing the actual audio/video work)
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Acquire microphone (and camera for video)
    async fn create_local_tracks(&self, kind: MediaKind) -> Result<LocalTracks, AppError>;

    /// Stop and release previously acquired tracks
    async fn release_local_tracks(&self, tracks: &LocalTracks) -> Result<(), AppError>;

    /// Join `channel_name` as `participant_id`
    async fn join(
        &self,
        credential: &JoinCredential,
        channel_name: &str,
        participant_id: &str,
    ) -> Result<JoinedChannel, AppError>;
}

/// Operations on a joined channel
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Publish local tracks
    async fn publish(&self, tracks: &LocalTracks) -> Result<(), AppError>;

    /// Subscribe to a remote participant's track
    async fn subscribe(&self, participant_id: &str, track: TrackKind) -> Result<(), AppError>;

    /// Enable or disable a published local track (mute, camera off)
    async fn set_track_enabled(&self, track: TrackKind, enabled: bool) -> Result<(), AppError>;

    /// Send a payload on the session data channel
    async fn send_data(&self, payload: &[u8]) -> Result<(), AppError>;

    /// Leave the channel
    async fn leave(&self) -> Result<(), AppError>;
}

/// Token-issuing collaborator
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a short-lived credential scoped to `channel_name`
    ///
    /// Fails with `AppError::Credential` if the participant lacks funds and
    /// is not the channel owner.
    async fn issue_join_credential(
        &self,
        channel_name: &str,
        participant_id: &str,
    ) -> Result<JoinCredential, AppError>;
}

/// Message received on a signal topic
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Live subscription to a signal topic
///
/// Dropping the subscription (or calling `unsubscribe`) detaches it.
pub struct Subscription {
    topic: String,
    receiver: mpsc::Receiver<SignalMessage>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        receiver: mpsc::Receiver<SignalMessage>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            receiver,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message; `None` once the transport closed the topic
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.receiver.recv().await
    }

    /// Detach from the topic
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.on_drop.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.on_drop.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Realtime push transport
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Publish an event on a topic
    async fn publish(
        &self,
        topic: &str,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError>;

    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError>;
}

/// Short-TTL invite inbox used by the poll fallback
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait InviteStore: Send + Sync {
    /// Store `invite` in its callee's inbox, superseding any prior one
    async fn put(&self, invite: &CallInvite, ttl_secs: u64) -> Result<(), AppError>;

    /// Latest unexpired invite for `target_id`
    async fn latest(&self, target_id: &str) -> Result<Option<CallInvite>, AppError>;

    /// Clear the inbox; returns whether an entry was removed
    async fn clear(&self, target_id: &str) -> Result<bool, AppError>;

    /// Clear the inbox only while it holds the invite for `channel_name`
    ///
    /// The comparison and the removal happen as one step, so an invite that
    /// supersedes in between is kept.
    async fn clear_if(&self, target_id: &str, channel_name: &str) -> Result<bool, AppError>;
}

/// Local capture of the combined local+remote stream
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MediaRecorder: Send + Sync {
    /// Begin capturing `channel_name`
    async fn start(&self, channel_name: &str) -> Result<(), AppError>;

    /// Stop capturing and return the artifact
    async fn stop(&self) -> Result<RecordingArtifact, AppError>;

    /// Stop capturing and throw the capture away
    async fn discard(&self) -> Result<(), AppError>;
}

/// Storage collaborator for finished recordings
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait StorageUploader: Send + Sync {
    /// Upload an artifact; returns its URL
    async fn upload(&self, artifact: RecordingArtifact) -> Result<String, AppError>;
}

/// Cache service trait
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Get value from cache
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError>;

    /// Set value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError>;

    /// Delete value from cache
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_subscription_detaches_on_drop() {
        let detached = Arc::new(AtomicBool::new(false));
        let flag = detached.clone();
        let (tx, rx) = mpsc::channel(4);

        let mut sub = Subscription::new("user:bob", rx, move || {
            flag.store(true, Ordering::SeqCst);
        });

        tx.send(SignalMessage {
            topic: "user:bob".to_string(),
            event: "incoming".to_string(),
            payload: serde_json::json!({}),
        })
        .await
        .unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.event, "incoming");
        assert_eq!(sub.topic(), "user:bob");

        drop(sub);
        assert!(detached.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unsubscribe_runs_once() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = count.clone();
        let (_tx, rx) = mpsc::channel(1);

        let sub = Subscription::new("user:bob", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
