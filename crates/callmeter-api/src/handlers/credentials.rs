//! Join credential handler

use crate::dto::{ApiResponse, CredentialRequest};
use crate::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::{traits::TokenIssuer, AppError};
use tracing::{instrument, warn};
use validator::Validate;

/// Issue a join credential
///
/// POST /api/v1/credentials
///
/// Refused with 402 when the participant's balance is below the configured
/// minimum, unless they own the channel.
#[instrument(skip(state, req), fields(channel = %req.channel_name, participant = %req.participant_id))]
pub async fn issue_credential(
    state: web::Data<AppState>,
    req: web::Json<CredentialRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Credential validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let credential = state
        .credentials
        .issue_join_credential(&req.channel_name, &req.participant_id)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(credential)))
}

/// Configure credential routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/credentials", web::post().to(issue_credential));
}
