//! Call session model
//!
//! A session is one participant's view of one channel. The status machine is
//! defined here as a single transition function so every component that
//! mutates a session goes through the same table.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::media::MediaKind;

/// Session kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Exactly two parties, billing-eligible
    #[default]
    Private,
    /// One broadcaster, N viewers, billing-exempt by policy
    Room,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Private => write!(f, "private"),
            SessionKind::Room => write!(f, "room"),
        }
    }
}

/// Participant role within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Initiates and pays for a private call
    Caller,
    /// Host being called, paid per minute
    Callee,
    /// Broadcaster of a room session
    RoomOwner,
    /// Audience member of a room session
    Viewer,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Caller => write!(f, "caller"),
            ParticipantRole::Callee => write!(f, "callee"),
            ParticipantRole::RoomOwner => write!(f, "room_owner"),
            ParticipantRole::Viewer => write!(f, "viewer"),
        }
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Ended,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Ended => "ended",
            SessionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Inputs that move a session between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTrigger {
    /// `start_call` requested
    Start,
    /// Channel joined (publish attempted)
    Joined,
    /// Transport reported an unexpected disconnect
    ConnectionLost,
    /// Transport reported the connection is back
    Reconnected,
    /// Unrecoverable join/publish failure
    Fail,
    /// Retry after an error
    Retry,
    /// Explicit `end_call`
    End,
}

impl fmt::Display for SessionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl SessionStatus {
    /// Apply a trigger, rejecting transitions not in the table
    pub fn apply(self, trigger: SessionTrigger) -> Result<SessionStatus, AppError> {
        use SessionStatus::*;
        use SessionTrigger::*;

        let next = match (self, trigger) {
            (Idle, Start) => Connecting,
            (Connecting, Joined) => Connected,
            (Connected, ConnectionLost) => Reconnecting,
            (Reconnecting, Reconnected) => Connected,
            (Connecting, Fail) | (Reconnecting, Fail) => Error,
            (Error, Retry) => Connecting,
            (from, End) if from != Ended => Ended,
            (from, trigger) => {
                return Err(AppError::InvalidTransition {
                    from: from.to_string(),
                    trigger: trigger.to_string(),
                })
            }
        };

        Ok(next)
    }

    /// Terminal statuses never leave except `Error` via retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Error)
    }

    /// Statuses in which the channel is joined
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Connected | SessionStatus::Reconnecting)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Local participant hung up
    Hangup,
    /// The sole remote participant of a private call left
    PeerLeft,
    /// Billing failed with insufficient funds
    OutOfFunds,
    /// The invite was rejected or cancelled
    Rejected,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Hangup => write!(f, "hangup"),
            EndReason::PeerLeft => write!(f, "peer_left"),
            EndReason::OutOfFunds => write!(f, "out_of_funds"),
            EndReason::Rejected => write!(f, "rejected"),
        }
    }
}

/// Parameters a session is started (and retried) with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Shared rendezvous identifier
    pub channel_name: String,

    /// Local participant id
    pub participant_id: String,

    /// Local participant role
    pub role: ParticipantRole,

    /// Private or room
    pub kind: SessionKind,

    /// Audio or video
    pub media: MediaKind,

    /// Explicitly free session (billing escape hatch)
    #[serde(default)]
    pub free: bool,

    /// Simulated/test session (billing escape hatch)
    #[serde(default)]
    pub simulated: bool,
}

impl SessionParams {
    /// Parameters for a private 1:1 call
    pub fn private(
        channel_name: impl Into<String>,
        participant_id: impl Into<String>,
        role: ParticipantRole,
        media: MediaKind,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            participant_id: participant_id.into(),
            role,
            kind: SessionKind::Private,
            media,
            free: false,
            simulated: false,
        }
    }

    /// Parameters for a room session
    pub fn room(
        channel_name: impl Into<String>,
        participant_id: impl Into<String>,
        role: ParticipantRole,
        media: MediaKind,
    ) -> Self {
        Self {
            kind: SessionKind::Room,
            ..Self::private(channel_name, participant_id, role, media)
        }
    }

    /// Whether this session may ever produce a ledger charge
    pub fn is_billable(&self, bill_room_sessions: bool) -> bool {
        if self.free || self.simulated {
            return false;
        }
        match self.kind {
            SessionKind::Private => true,
            SessionKind::Room => bill_room_sessions,
        }
    }
}

/// Snapshot of a session owned by one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSession {
    pub channel_name: String,
    pub participant_id: String,
    pub role: ParticipantRole,
    pub kind: SessionKind,
    pub media: MediaKind,
    pub status: SessionStatus,
    /// Remote participants currently subscribed
    pub remote_participants: Vec<String>,
}
