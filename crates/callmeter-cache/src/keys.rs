//! Cache key builders for Callmeter
//!
//! All keys are namespaced so several deployments can share one Redis.
//!
//! # Key Patterns
//!
//! - `{ns}:invite:{user_id}` - Latest pending call invite for a callee
//! - `{ns}:wallet:{account_id}` - Wallet balance in tokens
//!
//! # Example
//!
//! ```
//! use callmeter_cache::keys;
//!
//! assert_eq!(keys::invite_key("callmeter", "bob"), "callmeter:invite:bob");
//! assert_eq!(keys::wallet_key("callmeter", "alice"), "callmeter:wallet:alice");
//! ```

/// Prefix for invite inbox entries
pub const INVITE_PREFIX: &str = "invite";

/// Prefix for wallet balances
pub const WALLET_PREFIX: &str = "wallet";

/// Build the inbox key for a callee
pub fn invite_key(namespace: &str, user_id: &str) -> String {
    format!("{}:{}:{}", namespace, INVITE_PREFIX, user_id)
}

/// Build the balance key for an account
pub fn wallet_key(namespace: &str, account_id: &str) -> String {
    format!("{}:{}:{}", namespace, WALLET_PREFIX, account_id)
}

/// Build a pattern matching every key under `prefix`
///
/// # Warning
///
/// Scanning keys is expensive on large datasets; use only for maintenance.
pub fn pattern(namespace: &str, prefix: &str) -> String {
    format!("{}:{}:*", namespace, prefix)
}
