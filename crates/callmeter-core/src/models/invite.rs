//! Call invite model
//!
//! Invites are transient: created when a caller requests a session, dropped
//! on accept, reject or TTL expiry. One live invite exists per callee.

use crate::error::AppError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::media::MediaKind;

/// Event name published when an invite is delivered
pub const EVENT_INCOMING: &str = "incoming";

/// Event name published when an invite is withdrawn
pub const EVENT_CANCELLED: &str = "cancelled";

/// Payload a caller supplies to notify a callee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    /// Calling party
    pub from: String,

    /// Requested media kind
    pub kind: MediaKind,

    /// Rendezvous channel generated by the caller
    pub channel_name: String,
}

/// A pending call invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInvite {
    /// Distinct invite id (at-most-once delivery key)
    pub id: Uuid,

    /// Calling party
    pub from: String,

    /// Called party
    pub to: String,

    /// Requested media kind
    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Rendezvous channel shared by both parties
    pub channel_name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl CallInvite {
    /// Create a new invite addressed to `to`
    pub fn new(to: impl Into<String>, request: InviteRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: request.from,
            to: to.into(),
            kind: request.kind,
            channel_name: request.channel_name,
            created_at: Utc::now(),
        }
    }

    /// Check whether the invite outlived its TTL at `now`
    pub fn is_expired_at(&self, ttl_secs: u64, now: DateTime<Utc>) -> bool {
        now >= self.created_at + Duration::seconds(ttl_secs as i64)
    }

    /// Check whether the invite outlived its TTL
    pub fn is_expired(&self, ttl_secs: u64) -> bool {
        self.is_expired_at(ttl_secs, Utc::now())
    }

    /// Reject invites past their TTL
    pub fn ensure_live(&self, ttl_secs: u64) -> Result<(), AppError> {
        if self.is_expired(ttl_secs) {
            return Err(AppError::InviteExpired(self.id.to_string()));
        }
        Ok(())
    }

    /// Generate a fresh channel name for a call from `caller` to `callee`
    pub fn channel_for(caller: &str, callee: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("call-{}-{}-{}", caller, callee, &suffix[..12])
    }
}

/// Events carried on a per-user signal topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SignalEvent {
    /// A new invite for the topic owner
    Incoming(CallInvite),
    /// The caller withdrew the invite for `channel_name`
    Cancelled { from: String, channel_name: String },
}

impl SignalEvent {
    /// Event name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            SignalEvent::Incoming(_) => EVENT_INCOMING,
            SignalEvent::Cancelled { .. } => EVENT_CANCELLED,
        }
    }

    /// Payload without the event tag
    pub fn payload(&self) -> Result<serde_json::Value, AppError> {
        let value = match self {
            SignalEvent::Incoming(invite) => serde_json::to_value(invite)?,
            SignalEvent::Cancelled { from, channel_name } => {
                serde_json::json!({ "from": from, "channel_name": channel_name })
            }
        };
        Ok(value)
    }

    /// Rebuild an event from its wire name and payload
    pub fn from_parts(event_name: &str, payload: serde_json::Value) -> Result<Self, AppError> {
        let tagged = serde_json::json!({ "event": event_name, "payload": payload });
        serde_json::from_value(tagged).map_err(|e| {
            AppError::Serialization(format!("Unknown signal event {}: {}", event_name, e))
        })
    }
}
