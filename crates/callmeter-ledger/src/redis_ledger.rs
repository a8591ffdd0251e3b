//! Redis-backed wallet ledger
//!
//! Balances are plain integer keys (`{ns}:wallet:{account}`). Debit and
//! split payment run as Lua scripts so the balance check and both updates
//! happen without any other command interleaving.

use crate::ensure_non_negative;
use async_trait::async_trait;
use callmeter_cache::{keys, RedisCache};
use callmeter_core::{
    models::{RevenueShare, SplitReceipt, WalletBalance},
    traits::WalletLedger,
    AppError, AppResult,
};
use redis::Script;
use tracing::{debug, instrument, warn};

/// Debit KEYS[1] by ARGV[1]; returns {new_balance} or {-1, available}
const DEBIT_SCRIPT: &str = r#"
local available = tonumber(redis.call('GET', KEYS[1]) or '0')
local amount = tonumber(ARGV[1])
if available < amount then
  return {-1, available}
end
return {redis.call('DECRBY', KEYS[1], amount)}
"#;

/// Debit KEYS[1] by ARGV[1] and credit KEYS[2] by ARGV[2] in one step
const SPLIT_PAY_SCRIPT: &str = r#"
local available = tonumber(redis.call('GET', KEYS[1]) or '0')
local amount = tonumber(ARGV[1])
if available < amount then
  return {-1, available}
end
local payer_balance = redis.call('DECRBY', KEYS[1], amount)
redis.call('INCRBY', KEYS[2], tonumber(ARGV[2]))
return {payer_balance, tonumber(ARGV[2])}
"#;

/// Wallet ledger persisted in Redis
pub struct RedisLedger {
    cache: RedisCache,
    share: RevenueShare,
    debit_script: Script,
    split_script: Script,
}

impl RedisLedger {
    pub fn new(cache: RedisCache, share: RevenueShare) -> Self {
        Self {
            cache,
            share,
            debit_script: Script::new(DEBIT_SCRIPT),
            split_script: Script::new(SPLIT_PAY_SCRIPT),
        }
    }

    fn key(&self, account_id: &str) -> String {
        keys::wallet_key(self.cache.namespace(), account_id)
    }

    /// Turn a script reply into a balance or `InsufficientFunds`
    fn check_reply(reply: &[i64], required: i64) -> AppResult<i64> {
        match reply {
            [-1, available] => Err(AppError::InsufficientFunds {
                required,
                available: *available,
            }),
            [balance, ..] => Ok(*balance),
            [] => Err(AppError::Cache("Empty ledger script reply".to_string())),
        }
    }
}

#[async_trait]
impl WalletLedger for RedisLedger {
    async fn balance(&self, account_id: &str) -> AppResult<WalletBalance> {
        let amount = self
            .cache
            .get_i64(&self.key(account_id))
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;
        Ok(WalletBalance {
            account_id: account_id.to_string(),
            amount,
        })
    }

    #[instrument(skip(self))]
    async fn credit(&self, account_id: &str, amount: i64) -> AppResult<i64> {
        ensure_non_negative(amount)?;
        let balance = self.cache.incr_by(&self.key(account_id), amount).await?;
        debug!(account = %account_id, amount, balance, "Credited");
        Ok(balance)
    }

    #[instrument(skip(self))]
    async fn debit(&self, account_id: &str, amount: i64) -> AppResult<i64> {
        ensure_non_negative(amount)?;
        let key = self.key(account_id);
        let reply: Vec<i64> = self
            .cache
            .eval_script(&self.debit_script, &[&key], &[amount])
            .await?;
        Self::check_reply(&reply, amount).map_err(|e| {
            warn!(account = %account_id, amount, "Debit rejected: {}", e);
            e
        })
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
        let payer_key = self.key(payer_id);
        let payee_key = self.key(payee_id);

        let reply: Vec<i64> = self
            .cache
            .eval_script(
                &self.split_script,
                &[&payer_key, &payee_key],
                &[amount, payee_credit],
            )
            .await?;

        let payer_balance = Self::check_reply(&reply, amount).map_err(|e| {
            warn!(payer = %payer_id, amount, "Split payment rejected: {}", e);
            e
        })?;

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
