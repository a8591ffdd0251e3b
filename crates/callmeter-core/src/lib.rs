//! Callmeter Core Library
//!
//! This crate provides the foundational types, collaborator contracts, and
//! error handling for the Callmeter system. It includes:
//!
//! - Domain models (CallInvite, CallSession, WalletBalance, ConsentState, ...)
//! - Contracts for the external collaborators (media transport, ledger,
//!   signal transport, token issuer, recorder, storage)
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
