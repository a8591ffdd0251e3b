//! Invite handlers
//!
//! HTTP surface of the signal channel: notify, inbox polling, withdrawal
//! and resolution of call invites.

use crate::dto::{ApiResponse, InviteCreateRequest, NotifyResponse, ResolveRequest, ResolveResponse};
use crate::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Notify a callee
///
/// POST /api/v1/invites
#[instrument(skip(state, req), fields(target = %req.target_id, channel = %req.channel_name))]
pub async fn create_invite(
    state: web::Data<AppState>,
    req: web::Json<InviteCreateRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Invite validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let (target_id, request) = req.into_inner().into_parts();
    if target_id == request.from {
        return Err(AppError::Validation("Cannot invite yourself".to_string()));
    }

    let outcome = state.signal.notify(&target_id, request).await?;
    info!(
        invite_id = %outcome.invite.id,
        stored = outcome.stored,
        pushed = outcome.pushed,
        "Invite sent"
    );

    Ok(HttpResponse::Created().json(ApiResponse::success(NotifyResponse::from(outcome))))
}

/// Latest live invite for a user
///
/// GET /api/v1/invites/{user_id}
#[instrument(skip(state))]
pub async fn poll_invite(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    match state.signal.poll_inbox(&user_id).await? {
        Some(invite) => Ok(HttpResponse::Ok().json(ApiResponse::success(invite))),
        None => {
            debug!(user = %user_id, "Inbox empty");
            Ok(HttpResponse::NoContent().finish())
        }
    }
}

/// Withdraw the pending invite for a user
///
/// DELETE /api/v1/invites/{user_id}
#[instrument(skip(state))]
pub async fn cancel_invite(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    match state.signal.cancel(&user_id).await? {
        Some(invite) => {
            info!(user = %user_id, channel = %invite.channel_name, "Invite withdrawn");
            Ok(HttpResponse::Ok().json(ApiResponse::success(invite)))
        }
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

/// Clear a user's inbox entry for a channel
///
/// POST /api/v1/invites/{user_id}/resolve
#[instrument(skip(state, req))]
pub async fn resolve_invite(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ResolveRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Resolve validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let user_id = path.into_inner();
    let resolved = state.signal.resolve(&user_id, &req.channel_name).await?;
    debug!(user = %user_id, channel = %req.channel_name, resolved, "Invite resolved");

    Ok(HttpResponse::Ok().json(ApiResponse::success(ResolveResponse { resolved })))
}

/// Configure invite routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/invites")
            .route("", web::post().to(create_invite))
            .route("/{user_id}", web::get().to(poll_invite))
            .route("/{user_id}", web::delete().to(cancel_invite))
            .route("/{user_id}/resolve", web::post().to(resolve_invite)),
    );
}
