//! In-process stand-ins for the media transport, recorder and storage
//!
//! `SimulatedTransport` behaves like a tiny SFU: members of a channel see
//! each other's publishes, data messages and departures.

#![allow(dead_code)]

use async_trait::async_trait;
use callmeter_auth::CredentialService;
use callmeter_core::{
    config::{AuthConfig, BillingConfig, ConsentConfig},
    models::{
        JoinCredential, LocalTracks, MediaKind, RecordingArtifact, RevenueShare, SessionStatus,
        TrackKind, TransportEvent,
    },
    traits::{
        JoinedChannel, MediaConnection, MediaRecorder, MediaTransport, StorageUploader,
        WalletLedger,
    },
    AppError, AppResult,
};
use callmeter_ledger::MemoryLedger;
use callmeter_session::{ActiveCall, CallCoordinator, CallNotice, CallServices};
use callmeter_signal::{InviteResolver, MemoryInviteStore, SignalChannel, SignalHub};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

struct Member {
    participant_id: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    published: Vec<TrackKind>,
}

#[derive(Default)]
struct Channels {
    members: HashMap<String, Vec<Member>>,
}

impl Channels {
    fn others(&self, channel: &str, participant_id: &str) -> Vec<mpsc::UnboundedSender<TransportEvent>> {
        self.members
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.participant_id != participant_id)
                    .map(|m| m.events.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct SimulatedTransport {
    channels: Arc<Mutex<Channels>>,
    joins: Mutex<HashMap<String, usize>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of joins performed by `participant_id`
    pub fn joins(&self, participant_id: &str) -> usize {
        self.joins.lock().get(participant_id).copied().unwrap_or(0)
    }

    pub fn tracks_outstanding(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .members
            .get(channel)
            .map_or(0, |m| m.len())
    }

    /// Deliver a transport event to one member
    pub fn inject(&self, channel: &str, participant_id: &str, event: TransportEvent) {
        let channels = self.channels.lock();
        if let Some(member) = channels
            .members
            .get(channel)
            .and_then(|m| m.iter().find(|m| m.participant_id == participant_id))
        {
            let _ = member.events.send(event);
        }
    }
}

#[async_trait]
impl MediaTransport for SimulatedTransport {
    async fn create_local_tracks(&self, kind: MediaKind) -> AppResult<LocalTracks> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalTracks::new(kind))
    }

    async fn release_local_tracks(&self, _tracks: &LocalTracks) -> AppResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn join(
        &self,
        credential: &JoinCredential,
        channel_name: &str,
        participant_id: &str,
    ) -> AppResult<JoinedChannel> {
        if credential.is_expired() {
            return Err(AppError::JoinFailed("credential expired".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut channels = self.channels.lock();
            let members = channels.members.entry(channel_name.to_string()).or_default();
            for member in members.iter() {
                for track in &member.published {
                    let _ = tx.send(TransportEvent::ParticipantPublished {
                        participant_id: member.participant_id.clone(),
                        track: *track,
                    });
                }
            }
            members.push(Member {
                participant_id: participant_id.to_string(),
                events: tx,
                published: Vec::new(),
            });
        }
        *self
            .joins
            .lock()
            .entry(participant_id.to_string())
            .or_default() += 1;

        Ok(JoinedChannel {
            connection: Arc::new(SimulatedConnection {
                channels: self.channels.clone(),
                channel_name: channel_name.to_string(),
                participant_id: participant_id.to_string(),
            }),
            events: rx,
        })
    }
}

struct SimulatedConnection {
    channels: Arc<Mutex<Channels>>,
    channel_name: String,
    participant_id: String,
}

#[async_trait]
impl MediaConnection for SimulatedConnection {
    async fn publish(&self, tracks: &LocalTracks) -> AppResult<()> {
        let mut channels = self.channels.lock();
        let others = channels.others(&self.channel_name, &self.participant_id);
        if let Some(member) = channels
            .members
            .get_mut(&self.channel_name)
            .and_then(|m| m.iter_mut().find(|m| m.participant_id == self.participant_id))
        {
            member.published = tracks.kind.tracks().to_vec();
        }
        for track in tracks.kind.tracks() {
            for tx in &others {
                let _ = tx.send(TransportEvent::ParticipantPublished {
                    participant_id: self.participant_id.clone(),
                    track: *track,
                });
            }
        }
        Ok(())
    }

    async fn subscribe(&self, _participant_id: &str, _track: TrackKind) -> AppResult<()> {
        Ok(())
    }

    async fn set_track_enabled(&self, _track: TrackKind, _enabled: bool) -> AppResult<()> {
        Ok(())
    }

    async fn send_data(&self, payload: &[u8]) -> AppResult<()> {
        let channels = self.channels.lock();
        for tx in channels.others(&self.channel_name, &self.participant_id) {
            let _ = tx.send(TransportEvent::DataReceived {
                participant_id: self.participant_id.clone(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    async fn leave(&self) -> AppResult<()> {
        let mut channels = self.channels.lock();
        if let Some(members) = channels.members.get_mut(&self.channel_name) {
            members.retain(|m| m.participant_id != self.participant_id);
        }
        for tx in channels.others(&self.channel_name, &self.participant_id) {
            let _ = tx.send(TransportEvent::ParticipantLeft {
                participant_id: self.participant_id.clone(),
            });
        }
        Ok(())
    }
}

/// Recorder that counts starts and produces a fixed artifact
#[derive(Default)]
pub struct FakeRecorder {
    pub starts: AtomicUsize,
    pub discards: AtomicUsize,
    channel: Mutex<Option<String>>,
}

#[async_trait]
impl MediaRecorder for FakeRecorder {
    async fn start(&self, channel_name: &str) -> AppResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.channel.lock() = Some(channel_name.to_string());
        Ok(())
    }

    async fn stop(&self) -> AppResult<RecordingArtifact> {
        let channel_name = self
            .channel
            .lock()
            .take()
            .ok_or_else(|| AppError::Media("not recording".to_string()))?;
        let now = Utc::now();
        Ok(RecordingArtifact {
            channel_name,
            mime_type: "video/webm".to_string(),
            data: vec![0u8; 16],
            started_at: now,
            stopped_at: now,
        })
    }

    async fn discard(&self) -> AppResult<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        self.channel.lock().take();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: AtomicUsize,
}

#[async_trait]
impl StorageUploader for FakeUploader {
    async fn upload(&self, artifact: RecordingArtifact) -> AppResult<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://storage.local/recordings/{}.webm",
            artifact.channel_name
        ))
    }
}

/// Everything two or more parties need to call each other in-process
pub struct Harness {
    pub transport: Arc<SimulatedTransport>,
    pub ledger: Arc<MemoryLedger>,
    pub signal: Arc<SignalChannel>,
    pub issuer: Arc<CredentialService>,
    pub recorder: Arc<FakeRecorder>,
    pub uploader: Arc<FakeUploader>,
    pub billing: BillingConfig,
}

impl Harness {
    pub fn new(balances: &[(&str, i64)]) -> Self {
        let ledger = Arc::new(MemoryLedger::with_balances(
            RevenueShare::default(),
            balances.iter().map(|(id, amount)| (id.to_string(), *amount)),
        ));
        let hub = Arc::new(SignalHub::new(64));
        let store = Arc::new(MemoryInviteStore::new());
        let signal = Arc::new(SignalChannel::new(hub, store, 60));
        let auth = AuthConfig {
            jwt_secret: "integration-test-secret".to_string(),
            credential_ttl_secs: 3600,
            min_join_balance: 0,
        };
        let issuer = Arc::new(CredentialService::new(
            &auth,
            ledger.clone() as Arc<dyn WalletLedger>,
        ));

        Self {
            transport: SimulatedTransport::new(),
            ledger,
            signal,
            issuer,
            recorder: Arc::new(FakeRecorder::default()),
            uploader: Arc::new(FakeUploader::default()),
            billing: BillingConfig::default(),
        }
    }

    fn services(&self, with_storage: bool) -> CallServices {
        CallServices {
            transport: self.transport.clone(),
            issuer: self.issuer.clone(),
            ledger: self.ledger.clone(),
            signal: self.signal.clone(),
            recorder: with_storage.then(|| self.recorder.clone() as Arc<dyn MediaRecorder>),
            uploader: with_storage.then(|| self.uploader.clone() as Arc<dyn StorageUploader>),
        }
    }

    pub fn coordinator(&self, user_id: &str) -> CallCoordinator {
        self.build(user_id, false)
    }

    /// Coordinator whose calls can save recordings
    pub fn coordinator_with_storage(&self, user_id: &str) -> CallCoordinator {
        self.build(user_id, true)
    }

    fn build(&self, user_id: &str, with_storage: bool) -> CallCoordinator {
        CallCoordinator::new(
            user_id,
            self.services(with_storage),
            Arc::new(InviteResolver::new()),
            self.billing.clone(),
            ConsentConfig::default(),
        )
    }

    pub async fn balance(&self, account_id: &str) -> i64 {
        self.ledger
            .balance(account_id)
            .await
            .map(|b| b.amount)
            .unwrap_or(0)
    }
}

/// Wait until `call` reaches `status`
pub async fn wait_for_status(call: &ActiveCall, status: SessionStatus) {
    let mut rx = call.engine().subscribe_status();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == status))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

/// Wait until `call` has a remote participant
pub async fn wait_for_peer(call: &ActiveCall) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !call.engine().has_remote_peer() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for remote peer");
}

/// Receive notices until one matches
pub async fn wait_for_notice<F>(rx: &mut broadcast::Receiver<CallNotice>, pred: F) -> CallNotice
where
    F: FnMut(&CallNotice) -> bool,
{
    wait_for_notice_within(rx, Duration::from_secs(5), pred).await
}

/// Receive notices until one matches, for at most `within`
pub async fn wait_for_notice_within<F>(
    rx: &mut broadcast::Receiver<CallNotice>,
    within: Duration,
    mut pred: F,
) -> CallNotice
where
    F: FnMut(&CallNotice) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match rx.recv().await {
                Ok(notice) if pred(&notice) => return notice,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("notice channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}
