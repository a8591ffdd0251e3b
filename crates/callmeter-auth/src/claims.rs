//! Join credential claims

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried by a join credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinClaims {
    /// Participant id
    pub sub: String,

    /// Channel the credential is scoped to
    pub channel: String,

    /// Participant is the channel owner (billing-exempt host)
    #[serde(default)]
    pub owner: bool,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl JoinClaims {
    /// Create claims valid for `ttl_secs` from now
    pub fn new(participant_id: &str, channel_name: &str, owner: bool, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: participant_id.to_string(),
            channel: channel_name.to_string(),
            owner,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Whether these claims allow joining `channel_name`
    pub fn allows(&self, channel_name: &str) -> bool {
        self.channel == channel_name
    }
}
