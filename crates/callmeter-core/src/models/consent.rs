//! Recording consent model
//!
//! Consent messages travel over the session's own data channel. Each
//! envelope names its sender and the channel it belongs to; receivers drop
//! envelopes that are their own echo or belong to another channel.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Consent state scoped to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    #[default]
    Idle,
    /// Local side sent `REQ_REC` and awaits an answer
    Requesting,
    /// Remote side asked; local user must answer
    PendingApproval,
    Granted,
    Denied,
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsentState::Idle => "idle",
            ConsentState::Requesting => "requesting",
            ConsentState::PendingApproval => "pending_approval",
            ConsentState::Granted => "granted",
            ConsentState::Denied => "denied",
        };
        write!(f, "{}", s)
    }
}

/// Consent protocol messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentSignal {
    #[serde(rename = "REQ_REC")]
    RequestRecording,
    #[serde(rename = "RES_REC_OK")]
    Approve,
    #[serde(rename = "RES_REC_NO")]
    Decline,
}

/// A consent message as sent on the data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentEnvelope {
    /// Message id
    pub id: Uuid,

    /// Protocol message
    #[serde(rename = "type")]
    pub signal: ConsentSignal,

    /// Sending participant
    pub from: String,

    /// Channel the message belongs to
    pub channel_name: String,

    /// Send timestamp
    pub sent_at: DateTime<Utc>,
}

impl ConsentEnvelope {
    pub fn new(signal: ConsentSignal, from: &str, channel_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal,
            from: from.to_string(),
            channel_name: channel_name.to_string(),
            sent_at: Utc::now(),
        }
    }

    /// Encode for the data channel
    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a data channel payload
    ///
    /// Returns `Ok(None)` for payloads that are not consent messages.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, AppError> {
        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        let is_consent = value
            .get("type")
            .and_then(|t| t.as_str())
            .map_or(false, |t| t.starts_with("REQ_REC") || t.starts_with("RES_REC"));

        if !is_consent {
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(value)?))
    }

    /// Check that the envelope was sent by the remote party of `channel_name`
    pub fn verify(&self, local_participant: &str, channel_name: &str) -> Result<(), AppError> {
        if self.channel_name != channel_name {
            return Err(AppError::Validation(format!(
                "Consent message for channel {} received on {}",
                self.channel_name, channel_name
            )));
        }
        if self.from == local_participant {
            return Err(AppError::Validation(
                "Consent message echoed from local participant".to_string(),
            ));
        }
        Ok(())
    }
}
