//! Domain models for Callmeter
//!
//! This module contains all the core domain models used throughout the application.

pub mod consent;
pub mod invite;
pub mod media;
pub mod session;
pub mod wallet;

pub use consent::{ConsentEnvelope, ConsentSignal, ConsentState};
pub use invite::{CallInvite, InviteRequest, SignalEvent};
pub use media::{
    ConnectionState, JoinCredential, LocalTracks, MediaKind, RecordingArtifact, TrackKind,
    TransportEvent,
};
pub use session::{
    CallSession, EndReason, ParticipantRole, SessionKind, SessionParams, SessionStatus,
    SessionTrigger,
};
pub use wallet::{HostRates, RevenueShare, SplitReceipt, WalletBalance};
