//! Wallet DTOs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-up or debit request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AmountRequest {
    /// Token amount, strictly positive
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
}

/// Atomic payer to payee transfer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SplitPayRequest {
    #[validate(length(min = 1, max = 128))]
    pub payer_id: String,

    #[validate(length(min = 1, max = 128))]
    pub payee_id: String,

    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
}
