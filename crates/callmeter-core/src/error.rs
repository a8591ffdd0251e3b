//! Unified error handling for Callmeter
//!
//! This module provides a comprehensive error type that covers every failure
//! scenario of the call coordinator, with automatic HTTP response mapping for
//! the API layer and classification helpers for the session layer.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    // ==================== Signaling Errors ====================
    #[error("Invite expired: {0}")]
    InviteExpired(String),

    // ==================== Session Errors ====================
    #[error("Join failed: {0}")]
    JoinFailed(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Invalid session transition: {trigger} from {from}")]
    InvalidTransition { from: String, trigger: String },

    // ==================== Billing Errors ====================
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    // ==================== Consent Errors ====================
    #[error("Recording consent denied")]
    ConsentDenied,

    #[error("Upload failed: {0}")]
    Upload(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired => StatusCode::UNAUTHORIZED,

            // 402 Payment Required
            AppError::InsufficientFunds { .. } | AppError::Credential(_) => {
                StatusCode::PAYMENT_REQUIRED
            }

            // 403 Forbidden
            AppError::ConsentDenied => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::AccountNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 410 Gone
            AppError::InviteExpired(_) => StatusCode::GONE,

            // 503 Service Unavailable
            AppError::TransientNetwork(_) | AppError::CacheConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InviteExpired(_) => "invite_expired",
            AppError::JoinFailed(_) => "join_failed",
            AppError::Credential(_) => "credential_error",
            AppError::Media(_) => "media_error",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::TransientNetwork(_) => "transient_network_error",
            AppError::ConsentDenied => "consent_denied",
            AppError::Upload(_) => "upload_failed",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Errors that are absorbed by retrying on the next opportunity
    /// (next billing tick, next poll) instead of being surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::TransientNetwork(_) | AppError::CacheConnection(_)
        )
    }

    /// Errors that end the session they occur in.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, AppError::InsufficientFunds { .. })
    }

    /// Errors that put the engine into `error` with a retry affordance.
    pub fn is_retryable_join(&self) -> bool {
        matches!(
            self,
            AppError::JoinFailed(_) | AppError::Credential(_) | AppError::Media(_)
        ) || self.is_transient()
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        if let AppError::InsufficientFunds {
            required,
            available,
        } = self
        {
            body["required"] = json!(required);
            body["available"] = json!(available);
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::InsufficientFunds {
                required: 100,
                available: 50
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::AccountNotFound("host-1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::TransientNetwork("reset".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::InviteExpired("inv".to_string()).status_code(),
            StatusCode::GONE
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::ConsentDenied.error_code(), "consent_denied");
        assert_eq!(
            AppError::Credential("no funds".to_string()).error_code(),
            "credential_error"
        );
    }

    #[test]
    fn test_classification() {
        assert!(AppError::TransientNetwork("timeout".into()).is_transient());
        assert!(!AppError::InsufficientFunds {
            required: 1,
            available: 0
        }
        .is_transient());
        assert!(AppError::InsufficientFunds {
            required: 1,
            available: 0
        }
        .is_fatal_to_session());
        assert!(AppError::Credential("missing".into()).is_retryable_join());
        assert!(!AppError::ConsentDenied.is_retryable_join());
    }
}
