//! Join credential and channel owner DTOs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Join credential request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CredentialRequest {
    #[validate(length(min = 1, max = 256, message = "channel_name is required"))]
    pub channel_name: String,

    #[validate(length(min = 1, max = 128, message = "participant_id is required"))]
    pub participant_id: String,
}

/// Channel owner registration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OwnerRequest {
    #[validate(length(min = 1, max = 128, message = "owner_id is required"))]
    pub owner_id: String,
}

/// Channel owner as registered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerResponse {
    pub channel_name: String,
    pub owner_id: Option<String>,
}
