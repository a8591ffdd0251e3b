//! Wallet model
//!
//! Balances are non-negative integer token amounts owned by the ledger.
//! The core never caches a balance beyond one read-modify-use cycle.

use crate::error::AppError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::media::MediaKind;

/// Balance of one account as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub account_id: String,
    pub amount: i64,
}

/// Result of an atomic split payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReceipt {
    /// Payer balance after the debit
    pub payer_balance: i64,

    /// Amount credited to the payee
    pub payee_credit: i64,
}

/// Per-minute rates configured by a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRates {
    /// Tokens per minute for audio calls
    pub audio_per_minute: i64,

    /// Tokens per minute for video calls
    pub video_per_minute: i64,
}

impl HostRates {
    pub fn new(audio_per_minute: i64, video_per_minute: i64) -> Result<Self, AppError> {
        if audio_per_minute < 0 || video_per_minute < 0 {
            return Err(AppError::Validation(
                "Rates must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            audio_per_minute,
            video_per_minute,
        })
    }

    /// Rate applied to the active media kind
    #[inline]
    pub fn rate_for(&self, media: MediaKind) -> i64 {
        match media {
            MediaKind::Audio => self.audio_per_minute,
            MediaKind::Video => self.video_per_minute,
        }
    }
}

/// Fraction of each charge credited to the payee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueShare {
    percent: Decimal,
}

impl RevenueShare {
    /// Create a share from a whole percentage (0..=100)
    pub fn from_percent(percent: u32) -> Result<Self, AppError> {
        if percent > 100 {
            return Err(AppError::Validation(format!(
                "Host share {}% exceeds 100%",
                percent
            )));
        }
        Ok(Self {
            percent: Decimal::from(percent),
        })
    }

    /// Payee credit for a charge of `amount`, rounded down to whole tokens
    pub fn payee_credit(&self, amount: i64) -> i64 {
        let credit = Decimal::from(amount) * self.percent / Decimal::from(100);
        credit.floor().to_i64().unwrap_or(0)
    }
}

impl Default for RevenueShare {
    fn default() -> Self {
        Self {
            percent: Decimal::from(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_for_media() {
        let rates = HostRates::new(40, 100).unwrap();
        assert_eq!(rates.rate_for(MediaKind::Audio), 40);
        assert_eq!(rates.rate_for(MediaKind::Video), 100);
        assert!(HostRates::new(-1, 10).is_err());
    }

    #[test]
    fn test_revenue_share_rounds_down() {
        let share = RevenueShare::default();
        assert_eq!(share.payee_credit(100), 60);
        assert_eq!(share.payee_credit(33), 19);
        assert_eq!(RevenueShare::from_percent(100).unwrap().payee_credit(7), 7);
        assert_eq!(RevenueShare::from_percent(0).unwrap().payee_credit(7), 0);
        assert!(RevenueShare::from_percent(101).is_err());
    }
}
