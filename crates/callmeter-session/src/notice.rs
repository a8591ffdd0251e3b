//! Notices published to the UI collaborator

use callmeter_core::models::{EndReason, SessionStatus};
use serde::Serialize;

/// Call-level notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum CallNotice {
    StatusChanged { status: SessionStatus },
    /// A minute was charged; the balance comes from the ledger
    Charged {
        minute: u64,
        spent: i64,
        payer_balance: i64,
    },
    OutOfFunds { required: i64, available: i64 },
    /// The remote side asks to record
    ConsentPrompt { from: String },
    ConsentGranted,
    ConsentDenied,
    ConsentTimedOut,
    RecordingStarted,
    RecordingSaved { url: String },
    Ended { reason: EndReason },
    Error { code: String, message: String },
}

impl CallNotice {
    pub fn error(err: &callmeter_core::AppError) -> Self {
        CallNotice::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
