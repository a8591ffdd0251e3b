//! Channel owner registration

use crate::dto::{ApiResponse, OwnerRequest, OwnerResponse};
use crate::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use tracing::{info, instrument, warn};
use validator::Validate;

/// POST /api/v1/channels/{channel}/owner
#[instrument(skip(state, req))]
pub async fn register_owner(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<OwnerRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Owner validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let channel_name = path.into_inner();
    state.credentials.register_owner(&channel_name, &req.owner_id);
    info!(channel = %channel_name, owner = %req.owner_id, "Channel owner registered");

    Ok(HttpResponse::Ok().json(ApiResponse::success(OwnerResponse {
        channel_name,
        owner_id: Some(req.into_inner().owner_id),
    })))
}

/// DELETE /api/v1/channels/{channel}/owner
#[instrument(skip(state))]
pub async fn unregister_owner(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let channel_name = path.into_inner();

    if !state.credentials.unregister_owner(&channel_name) {
        return Err(AppError::NotFound(format!(
            "Channel {} has no registered owner",
            channel_name
        )));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(OwnerResponse {
        channel_name,
        owner_id: None,
    })))
}

/// Configure channel routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/channels")
            .route("/{channel}/owner", web::post().to(register_owner))
            .route("/{channel}/owner", web::delete().to(unregister_owner)),
    );
}
