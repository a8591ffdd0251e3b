//! Invite DTOs

use callmeter_core::models::{CallInvite, InviteRequest, MediaKind};
use callmeter_signal::NotifyOutcome;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Notify request
///
/// The invite fields sit next to `target_id` in the body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InviteCreateRequest {
    /// Called party
    #[validate(length(min = 1, max = 128, message = "target_id is required"))]
    pub target_id: String,

    /// Calling party
    #[validate(length(min = 1, max = 128, message = "from is required"))]
    pub from: String,

    /// Requested media kind
    pub kind: MediaKind,

    /// Rendezvous channel generated by the caller
    #[validate(length(min = 1, max = 256, message = "channel_name is required"))]
    pub channel_name: String,
}

impl InviteCreateRequest {
    /// Split into the target and the invite payload
    pub fn into_parts(self) -> (String, InviteRequest) {
        (
            self.target_id,
            InviteRequest {
                from: self.from,
                kind: self.kind,
                channel_name: self.channel_name,
            },
        )
    }
}

/// Notify response: the created invite plus which delivery paths took it
#[derive(Debug, Clone, Serialize)]
pub struct NotifyResponse {
    #[serde(flatten)]
    pub invite: CallInvite,
    pub stored: bool,
    pub pushed: bool,
}

impl From<NotifyOutcome> for NotifyResponse {
    fn from(outcome: NotifyOutcome) -> Self {
        Self {
            invite: outcome.invite,
            stored: outcome.stored,
            pushed: outcome.pushed,
        }
    }
}

/// Resolve request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolveRequest {
    #[validate(length(min = 1, max = 256, message = "channel_name is required"))]
    pub channel_name: String,
}

/// Resolve response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Whether the inbox entry was cleared
    pub resolved: bool,
}
