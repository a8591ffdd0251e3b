//! API layer for Callmeter
//!
//! HTTP handlers exposing the signal channel, the wallet ledger and the
//! join credential issuer, plus a WebSocket bridge onto per-user topics.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

use actix_web::web;
use callmeter_auth::CredentialService;
use callmeter_core::traits::WalletLedger;
use callmeter_signal::SignalChannel;
use std::sync::Arc;

pub use dto::ApiResponse;
pub use handlers::{
    configure_channels, configure_credentials, configure_invites, configure_signal,
    configure_wallets, health_check,
};

/// Shared collaborators handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn WalletLedger>,
    pub signal: Arc<SignalChannel>,
    pub credentials: Arc<CredentialService>,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn WalletLedger>,
        signal: Arc<SignalChannel>,
        credentials: Arc<CredentialService>,
    ) -> Self {
        Self {
            ledger,
            signal,
            credentials,
        }
    }
}

/// Configure API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            // Health check
            .route("/health", web::get().to(health_check))
            // Invite signaling
            .configure(configure_invites)
            // Live topic bridge
            .configure(configure_signal)
            // Wallet ledger
            .configure(configure_wallets)
            // Join credentials and channel owners
            .configure(configure_credentials)
            .configure(configure_channels),
    );
}
