//! In-process wallet ledger
//!
//! All balances live behind one async mutex, so each operation (including
//! the two-sided split) runs as a single critical section.

use crate::ensure_non_negative;
use async_trait::async_trait;
use callmeter_core::{
    models::{RevenueShare, SplitReceipt, WalletBalance},
    traits::WalletLedger,
    AppError, AppResult,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Wallet ledger held in memory
pub struct MemoryLedger {
    accounts: Mutex<HashMap<String, i64>>,
    share: RevenueShare,
}

impl MemoryLedger {
    pub fn new(share: RevenueShare) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            share,
        }
    }

    /// Seed balances (tests and demos)
    pub fn with_balances<I, S>(share: RevenueShare, balances: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let accounts = balances
            .into_iter()
            .map(|(id, amount)| (id.into(), amount))
            .collect();
        Self {
            accounts: Mutex::new(accounts),
            share,
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(RevenueShare::default())
    }
}

#[async_trait]
impl WalletLedger for MemoryLedger {
    async fn balance(&self, account_id: &str) -> AppResult<WalletBalance> {
        let accounts = self.accounts.lock().await;
        let amount = accounts
            .get(account_id)
            .copied()
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;
        Ok(WalletBalance {
            account_id: account_id.to_string(),
            amount,
        })
    }

    #[instrument(skip(self))]
    async fn credit(&self, account_id: &str, amount: i64) -> AppResult<i64> {
        ensure_non_negative(amount)?;
        let mut accounts = self.accounts.lock().await;
        let balance = accounts.entry(account_id.to_string()).or_insert(0);
        *balance += amount;
        debug!(account = %account_id, amount, balance = *balance, "Credited");
        Ok(*balance)
    }

    #[instrument(skip(self))]
    async fn debit(&self, account_id: &str, amount: i64) -> AppResult<i64> {
        ensure_non_negative(amount)?;
        let mut accounts = self.accounts.lock().await;
        let available = accounts.get(account_id).copied().unwrap_or(0);
        if available < amount {
            warn!(account = %account_id, amount, available, "Debit rejected");
            return Err(AppError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        let balance = accounts.entry(account_id.to_string()).or_insert(0);
        *balance -= amount;
        Ok(*balance)
    }

    #[instrument(skip(self))]
    async fn split_pay(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
    ) -> AppResult<SplitReceipt> {
        ensure_non_negative(amount)?;
        let payee_credit = self.share.payee_credit(amount);

        let mut accounts = self.accounts.lock().await;
        let available = accounts.get(payer_id).copied().unwrap_or(0);
        if available < amount {
            warn!(payer = %payer_id, amount, available, "Split payment rejected");
            return Err(AppError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        let payer_balance = available - amount;
        accounts.insert(payer_id.to_string(), payer_balance);
        *accounts.entry(payee_id.to_string()).or_insert(0) += payee_credit;

        debug!(
            payer = %payer_id,
            payee = %payee_id,
            amount,
            payee_credit,
            payer_balance,
            "Split payment applied"
        );

        Ok(SplitReceipt {
            payer_balance,
            payee_credit,
        })
    }
}
