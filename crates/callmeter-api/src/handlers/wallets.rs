//! Wallet handlers
//!
//! Balance reads, top-ups, debits and split payments against the ledger.

use crate::dto::{AmountRequest, ApiResponse, SplitPayRequest};
use crate::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::{models::WalletBalance, AppError};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Current balance
///
/// GET /api/v1/wallets/{id}
#[instrument(skip(state))]
pub async fn get_balance(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let account_id = path.into_inner();
    let balance = state.ledger.balance(&account_id).await?;
    debug!(account = %account_id, amount = balance.amount, "Balance read");

    Ok(HttpResponse::Ok().json(ApiResponse::success(balance)))
}

/// Add tokens to a wallet
///
/// POST /api/v1/wallets/{id}/topup
#[instrument(skip(state, req))]
pub async fn topup(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<AmountRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Topup validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let account_id = path.into_inner();
    let amount = state.ledger.credit(&account_id, req.amount).await?;
    info!(account = %account_id, credited = req.amount, balance = amount, "Topup successful");

    Ok(HttpResponse::Ok().json(ApiResponse::success(WalletBalance { account_id, amount })))
}

/// Remove tokens from a wallet
///
/// POST /api/v1/wallets/{id}/debit
#[instrument(skip(state, req))]
pub async fn debit(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<AmountRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Debit validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let account_id = path.into_inner();
    let amount = state.ledger.debit(&account_id, req.amount).await?;
    info!(account = %account_id, debited = req.amount, balance = amount, "Debit successful");

    Ok(HttpResponse::Ok().json(ApiResponse::success(WalletBalance { account_id, amount })))
}

/// Debit the payer and credit the payee's share atomically
///
/// POST /api/v1/wallets/split
#[instrument(skip(state, req), fields(payer = %req.payer_id, payee = %req.payee_id))]
pub async fn split_pay(
    state: web::Data<AppState>,
    req: web::Json<SplitPayRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Split validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    if req.payer_id == req.payee_id {
        return Err(AppError::Validation(
            "Payer and payee must differ".to_string(),
        ));
    }

    let receipt = state
        .ledger
        .split_pay(&req.payer_id, &req.payee_id, req.amount)
        .await?;
    info!(
        amount = req.amount,
        payer_balance = receipt.payer_balance,
        payee_credit = receipt.payee_credit,
        "Split payment settled"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(receipt)))
}

/// Configure wallet routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/wallets")
            .route("/split", web::post().to(split_pay))
            .route("/{id}", web::get().to(get_balance))
            .route("/{id}/topup", web::post().to(topup))
            .route("/{id}/debit", web::post().to(debit)),
    );
}
