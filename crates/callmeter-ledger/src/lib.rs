//! Callmeter Wallet Ledger
//!
//! Implementations of the `WalletLedger` contract. Every operation is
//! atomic: a debit that would make a balance negative is rejected and the
//! split payment applies both sides or neither.
//!
//! - [`MemoryLedger`]: single-mutex in-process ledger (tests, single node)
//! - [`RedisLedger`]: Redis-backed ledger using Lua scripts

pub mod memory;
pub mod redis_ledger;

pub use memory::MemoryLedger;
pub use redis_ledger::RedisLedger;

// Re-export commonly used types
pub use callmeter_core::{AppError, AppResult};

/// Reject negative amounts before touching any balance
pub(crate) fn ensure_non_negative(amount: i64) -> AppResult<()> {
    if amount < 0 {
        return Err(AppError::Validation(format!(
            "Amount must be non-negative, got {}",
            amount
        )));
    }
    Ok(())
}
