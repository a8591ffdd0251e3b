//! Recording consent workflow
//!
//! Two-message handshake over the session data channel:
//!
//! ```text
//!  requester                      responder
//!  idle ── REQ_REC ─────────────> idle → pending_approval
//!  requesting <── RES_REC_OK/NO ── respond(approve)
//!  granted | idle(denied)          granted | idle(denied)
//! ```
//!
//! Capture starts only once consent is granted, and only on a side that has
//! somewhere to save the recording. A `RES_REC_NO` after granting withdraws
//! consent and discards the capture; a granting side that is not recording
//! may be asked again.

use async_trait::async_trait;
use callmeter_core::{
    models::{ConsentEnvelope, ConsentSignal, ConsentState},
    traits::{MediaRecorder, StorageUploader},
    AppError, AppResult,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::CallEngine;
use crate::notice::CallNotice;

/// Outbound side of the session data channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send_data(&self, payload: &[u8]) -> AppResult<()>;
}

#[async_trait]
impl DataChannel for CallEngine {
    async fn send_data(&self, payload: &[u8]) -> AppResult<()> {
        CallEngine::send_data(self, payload).await
    }
}

/// Consent state of one session plus the capture it gates
pub struct ConsentWorkflow {
    local_id: String,
    channel_name: String,
    channel: Arc<dyn DataChannel>,
    recorder: Option<Arc<dyn MediaRecorder>>,
    uploader: Option<Arc<dyn StorageUploader>>,
    notices: broadcast::Sender<CallNotice>,
    timeout: Duration,
    state: ConsentState,
    since: DateTime<Utc>,
    recording: bool,
}

impl ConsentWorkflow {
    pub fn new(
        local_id: impl Into<String>,
        channel_name: impl Into<String>,
        channel: Arc<dyn DataChannel>,
        notices: broadcast::Sender<CallNotice>,
        response_timeout_secs: i64,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            channel_name: channel_name.into(),
            channel,
            recorder: None,
            uploader: None,
            notices,
            timeout: Duration::seconds(response_timeout_secs),
            state: ConsentState::Idle,
            since: Utc::now(),
            recording: false,
        }
    }

    /// Give this side a save destination
    pub fn with_storage(
        mut self,
        recorder: Arc<dyn MediaRecorder>,
        uploader: Arc<dyn StorageUploader>,
    ) -> Self {
        self.recorder = Some(recorder);
        self.uploader = Some(uploader);
        self
    }

    pub fn state(&self) -> ConsentState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn can_save(&self) -> bool {
        self.recorder.is_some() && self.uploader.is_some()
    }

    /// Ask the remote party for permission to record
    ///
    /// # Errors
    ///
    /// `Validation` unless idle; data channel errors leave the state idle.
    #[instrument(skip(self), fields(channel = %self.channel_name))]
    pub async fn request(&mut self) -> AppResult<()> {
        if self.state != ConsentState::Idle {
            return Err(AppError::Validation(format!(
                "Consent is already {}",
                self.state
            )));
        }

        self.send(ConsentSignal::RequestRecording).await?;
        self.enter(ConsentState::Requesting);
        info!("Recording consent requested");
        Ok(())
    }

    /// Answer a pending request from the remote party
    #[instrument(skip(self), fields(channel = %self.channel_name))]
    pub async fn respond(&mut self, approve: bool) -> AppResult<()> {
        if self.state != ConsentState::PendingApproval {
            return Err(AppError::Validation(format!(
                "No consent request pending (state {})",
                self.state
            )));
        }

        let signal = if approve {
            ConsentSignal::Approve
        } else {
            ConsentSignal::Decline
        };
        self.send(signal).await?;

        if approve {
            self.grant().await;
        } else {
            self.deny().await;
        }
        Ok(())
    }

    /// Take back consent given to the remote party
    ///
    /// The remote side discards its capture on receipt.
    #[instrument(skip(self), fields(channel = %self.channel_name))]
    pub async fn withdraw(&mut self) -> AppResult<()> {
        if self.state != ConsentState::Granted {
            return Err(AppError::Validation(format!(
                "No consent to withdraw (state {})",
                self.state
            )));
        }
        self.send(ConsentSignal::Decline).await?;
        self.deny().await;
        Ok(())
    }

    /// Feed a raw data channel payload
    ///
    /// Returns `true` if the payload was a consent message for this session.
    pub async fn on_payload(&mut self, payload: &[u8]) -> bool {
        let envelope = match ConsentEnvelope::decode(payload) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return false,
            Err(e) => {
                warn!(channel = %self.channel_name, error = %e, "Malformed consent message");
                return false;
            }
        };
        self.on_message(envelope).await
    }

    /// Apply a consent message received from the remote party
    pub async fn on_message(&mut self, envelope: ConsentEnvelope) -> bool {
        if let Err(e) = envelope.verify(&self.local_id, &self.channel_name) {
            warn!(from = %envelope.from, error = %e, "Consent message rejected");
            return false;
        }

        match (envelope.signal, self.state) {
            (ConsentSignal::RequestRecording, ConsentState::Idle | ConsentState::Granted)
                if !self.recording =>
            {
                self.enter(ConsentState::PendingApproval);
                info!(from = %envelope.from, channel = %self.channel_name, "Recording consent asked");
                self.notify(CallNotice::ConsentPrompt {
                    from: envelope.from,
                });
            }
            (ConsentSignal::Approve, ConsentState::Requesting) => self.grant().await,
            (ConsentSignal::Decline, ConsentState::Requesting | ConsentState::Granted) => {
                self.deny().await
            }
            (signal, state) => {
                debug!(?signal, %state, "Consent message ignored");
            }
        }
        true
    }

    /// Stop capture and hand the artifact to storage
    ///
    /// Returns the stored URL, or `None` when nothing was recording.
    ///
    /// # Errors
    ///
    /// Recorder and upload failures; the capture is stopped either way.
    #[instrument(skip(self), fields(channel = %self.channel_name))]
    pub async fn stop_recording(&mut self) -> AppResult<Option<String>> {
        if !self.recording {
            if self.state == ConsentState::Granted {
                self.enter(ConsentState::Idle);
            }
            return Ok(None);
        }
        let (Some(recorder), Some(uploader)) = (self.recorder.clone(), self.uploader.clone())
        else {
            return Ok(None);
        };

        self.recording = false;
        self.enter(ConsentState::Idle);

        let artifact = recorder.stop().await?;
        let duration_secs = artifact.duration_secs();
        let url = uploader.upload(artifact).await.map_err(|e| {
            error!(error = %e, "Recording upload failed");
            match e {
                AppError::Upload(_) => e,
                other => AppError::Upload(other.to_string()),
            }
        })?;

        info!(%url, duration_secs, "Recording saved");
        self.notify(CallNotice::RecordingSaved { url: url.clone() });
        Ok(Some(url))
    }

    /// Reset on session end, saving any capture in progress
    pub async fn on_session_end(&mut self) -> Option<String> {
        let url = match self.stop_recording().await {
            Ok(url) => url,
            Err(e) => {
                warn!(channel = %self.channel_name, error = %e, "Failed to save recording at session end");
                self.notify(CallNotice::error(&e));
                None
            }
        };
        if self.state != ConsentState::Idle {
            debug!(state = %self.state, "Consent reset on session end");
            self.enter(ConsentState::Idle);
        }
        url
    }

    /// Drop an unanswered handshake older than the response timeout
    pub fn expire_pending(&mut self, now: DateTime<Utc>) -> bool {
        let waiting = matches!(
            self.state,
            ConsentState::Requesting | ConsentState::PendingApproval
        );
        if !waiting || now - self.since < self.timeout {
            return false;
        }

        info!(channel = %self.channel_name, state = %self.state, "Consent request timed out");
        self.enter(ConsentState::Idle);
        self.notify(CallNotice::ConsentTimedOut);
        true
    }

    async fn grant(&mut self) {
        self.enter(ConsentState::Granted);
        info!(channel = %self.channel_name, "Recording consent granted");
        self.notify(CallNotice::ConsentGranted);

        let Some(recorder) = self.recorder.clone() else {
            return;
        };
        if !self.can_save() {
            return;
        }
        match recorder.start(&self.channel_name).await {
            Ok(()) => {
                self.recording = true;
                self.notify(CallNotice::RecordingStarted);
            }
            Err(e) => {
                error!(channel = %self.channel_name, error = %e, "Failed to start recording");
                self.notify(CallNotice::error(&e));
            }
        }
    }

    async fn deny(&mut self) {
        if self.recording {
            self.recording = false;
            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.discard().await {
                    warn!(error = %e, "Failed to discard recording");
                }
            }
        }
        self.enter(ConsentState::Idle);
        info!(channel = %self.channel_name, "Recording consent denied");
        self.notify(CallNotice::ConsentDenied);
    }

    async fn send(&self, signal: ConsentSignal) -> AppResult<()> {
        let envelope = ConsentEnvelope::new(signal, &self.local_id, &self.channel_name);
        self.channel.send_data(&envelope.encode()?).await
    }

    fn enter(&mut self, state: ConsentState) {
        self.state = state;
        self.since = Utc::now();
    }

    fn notify(&self, notice: CallNotice) {
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::models::RecordingArtifact;
    use callmeter_core::traits::{MockMediaRecorder, MockStorageUploader};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct LoopbackChannel {
        sent: Mutex<Vec<ConsentEnvelope>>,
    }

    #[async_trait]
    impl DataChannel for LoopbackChannel {
        async fn send_data(&self, payload: &[u8]) -> AppResult<()> {
            let envelope = ConsentEnvelope::decode(payload)?
                .ok_or_else(|| AppError::Validation("not a consent message".to_string()))?;
            self.sent.lock().push(envelope);
            Ok(())
        }
    }

    fn workflow(
        local: &str,
    ) -> (
        ConsentWorkflow,
        Arc<LoopbackChannel>,
        broadcast::Receiver<CallNotice>,
    ) {
        let channel = Arc::new(LoopbackChannel::default());
        let (tx, rx) = broadcast::channel(16);
        let wf = ConsentWorkflow::new(local, "c1", channel.clone(), tx, 30);
        (wf, channel, rx)
    }

    fn artifact() -> RecordingArtifact {
        let now = Utc::now();
        RecordingArtifact {
            channel_name: "c1".to_string(),
            mime_type: "video/webm".to_string(),
            data: vec![1, 2, 3],
            started_at: now - Duration::seconds(42),
            stopped_at: now,
        }
    }

    #[tokio::test]
    async fn test_granted_request_records_and_uploads() {
        let mut recorder = MockMediaRecorder::new();
        recorder.expect_start().times(1).returning(|_| Ok(()));
        recorder.expect_stop().times(1).returning(|| Ok(artifact()));
        let mut uploader = MockStorageUploader::new();
        uploader
            .expect_upload()
            .times(1)
            .returning(|_| Ok("https://storage.local/rec/c1.webm".to_string()));

        let (wf, channel, mut notices) = workflow("host");
        let mut wf = wf.with_storage(Arc::new(recorder), Arc::new(uploader));

        wf.request().await.unwrap();
        assert_eq!(wf.state(), ConsentState::Requesting);
        assert_eq!(channel.sent.lock()[0].signal, ConsentSignal::RequestRecording);

        let reply = ConsentEnvelope::new(ConsentSignal::Approve, "guest", "c1");
        assert!(wf.on_message(reply).await);
        assert_eq!(wf.state(), ConsentState::Granted);
        assert!(wf.is_recording());

        let url = wf.stop_recording().await.unwrap();
        assert_eq!(url.as_deref(), Some("https://storage.local/rec/c1.webm"));
        assert!(!wf.is_recording());

        assert_eq!(notices.try_recv().unwrap(), CallNotice::ConsentGranted);
        assert_eq!(notices.try_recv().unwrap(), CallNotice::RecordingStarted);
        assert!(matches!(
            notices.try_recv().unwrap(),
            CallNotice::RecordingSaved { .. }
        ));
    }

    #[tokio::test]
    async fn test_prompt_then_decline() {
        let (mut wf, channel, mut notices) = workflow("guest");

        let ask = ConsentEnvelope::new(ConsentSignal::RequestRecording, "host", "c1");
        wf.on_payload(&ask.encode().unwrap()).await;
        assert_eq!(wf.state(), ConsentState::PendingApproval);
        assert_eq!(
            notices.try_recv().unwrap(),
            CallNotice::ConsentPrompt {
                from: "host".to_string()
            }
        );

        wf.respond(false).await.unwrap();
        assert_eq!(channel.sent.lock()[0].signal, ConsentSignal::Decline);
        assert_eq!(wf.state(), ConsentState::Idle);
        assert_eq!(notices.try_recv().unwrap(), CallNotice::ConsentDenied);
    }

    #[tokio::test]
    async fn test_responder_without_storage_does_not_record() {
        let (mut wf, channel, _notices) = workflow("guest");
        let ask = ConsentEnvelope::new(ConsentSignal::RequestRecording, "host", "c1");
        wf.on_message(ask).await;

        wf.respond(true).await.unwrap();
        assert_eq!(channel.sent.lock()[0].signal, ConsentSignal::Approve);
        assert_eq!(wf.state(), ConsentState::Granted);
        assert!(!wf.is_recording());
        assert_eq!(wf.stop_recording().await.unwrap(), None);
        assert_eq!(wf.state(), ConsentState::Idle);
    }

    #[tokio::test]
    async fn test_decline_after_grant_discards_capture() {
        let mut recorder = MockMediaRecorder::new();
        recorder.expect_start().times(1).returning(|_| Ok(()));
        recorder.expect_discard().times(1).returning(|| Ok(()));
        recorder.expect_stop().never();
        let uploader = MockStorageUploader::new();

        let (wf, _channel, mut notices) = workflow("host");
        let mut wf = wf.with_storage(Arc::new(recorder), Arc::new(uploader));

        wf.request().await.unwrap();
        wf.on_message(ConsentEnvelope::new(ConsentSignal::Approve, "guest", "c1"))
            .await;
        assert!(wf.is_recording());

        wf.on_message(ConsentEnvelope::new(ConsentSignal::Decline, "guest", "c1"))
            .await;
        assert_eq!(wf.state(), ConsentState::Idle);
        assert!(!wf.is_recording());

        assert_eq!(notices.try_recv().unwrap(), CallNotice::ConsentGranted);
        assert_eq!(notices.try_recv().unwrap(), CallNotice::RecordingStarted);
        assert_eq!(notices.try_recv().unwrap(), CallNotice::ConsentDenied);
        assert_eq!(wf.on_session_end().await, None);
    }

    #[tokio::test]
    async fn test_granting_side_can_be_asked_again() {
        let (mut wf, _channel, mut notices) = workflow("guest");
        let ask = ConsentEnvelope::new(ConsentSignal::RequestRecording, "host", "c1");

        wf.on_message(ask.clone()).await;
        wf.respond(true).await.unwrap();
        assert_eq!(wf.state(), ConsentState::Granted);
        let _ = notices.try_recv();
        let _ = notices.try_recv();

        wf.on_message(ask).await;
        assert_eq!(wf.state(), ConsentState::PendingApproval);
        assert_eq!(
            notices.try_recv().unwrap(),
            CallNotice::ConsentPrompt {
                from: "host".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_withdraw_sends_decline() {
        let (mut wf, channel, _notices) = workflow("guest");
        assert!(matches!(wf.withdraw().await, Err(AppError::Validation(_))));

        wf.on_message(ConsentEnvelope::new(ConsentSignal::RequestRecording, "host", "c1"))
            .await;
        wf.respond(true).await.unwrap();
        wf.withdraw().await.unwrap();

        let sent: Vec<_> = channel.sent.lock().iter().map(|e| e.signal).collect();
        assert_eq!(sent, vec![ConsentSignal::Approve, ConsentSignal::Decline]);
        assert_eq!(wf.state(), ConsentState::Idle);
    }

    #[tokio::test]
    async fn test_echo_and_foreign_channel_rejected() {
        let (mut wf, _channel, _notices) = workflow("guest");

        let echo = ConsentEnvelope::new(ConsentSignal::RequestRecording, "guest", "c1");
        assert!(!wf.on_message(echo).await);
        let foreign = ConsentEnvelope::new(ConsentSignal::RequestRecording, "host", "c2");
        assert!(!wf.on_message(foreign).await);
        assert!(!wf.on_payload(br#"{"type":"chat"}"#).await);

        assert_eq!(wf.state(), ConsentState::Idle);
    }

    #[tokio::test]
    async fn test_session_end_while_requesting_never_captures() {
        let mut recorder = MockMediaRecorder::new();
        recorder.expect_start().never();
        recorder.expect_stop().never();
        let uploader = MockStorageUploader::new();

        let (wf, _channel, _notices) = workflow("host");
        let mut wf = wf.with_storage(Arc::new(recorder), Arc::new(uploader));

        wf.request().await.unwrap();
        assert_eq!(wf.on_session_end().await, None);
        assert_eq!(wf.state(), ConsentState::Idle);

        let late = ConsentEnvelope::new(ConsentSignal::Approve, "guest", "c1");
        wf.on_message(late).await;
        assert_eq!(wf.state(), ConsentState::Idle);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (mut wf, _channel, mut notices) = workflow("host");
        wf.request().await.unwrap();

        let now = Utc::now();
        assert!(!wf.expire_pending(now + Duration::seconds(5)));
        assert!(wf.expire_pending(now + Duration::seconds(31)));
        assert_eq!(wf.state(), ConsentState::Idle);
        assert_eq!(notices.try_recv().unwrap(), CallNotice::ConsentTimedOut);

        let late = ConsentEnvelope::new(ConsentSignal::Approve, "guest", "c1");
        wf.on_message(late).await;
        assert_eq!(wf.state(), ConsentState::Idle);
        assert!(!wf.expire_pending(now + Duration::seconds(90)));
    }

    #[tokio::test]
    async fn test_respond_requires_pending_request() {
        let (mut wf, _channel, _notices) = workflow("guest");
        assert!(matches!(
            wf.respond(true).await,
            Err(AppError::Validation(_))
        ));

        wf.request().await.unwrap();
        assert!(wf.request().await.is_err());
    }
}
