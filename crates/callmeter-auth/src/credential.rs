//! Join credential issuance
//!
//! A participant may join a channel only with a credential scoped to it.
//! Credentials are refused to participants whose wallet is below the
//! configured minimum, except the channel's registered owner.

use crate::claims::JoinClaims;
use crate::jwt::JwtService;
use async_trait::async_trait;
use callmeter_core::{
    config::AuthConfig,
    models::JoinCredential,
    traits::{TokenIssuer, WalletLedger},
    AppError, AppResult,
};
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Token-issuing service backed by the wallet ledger
pub struct CredentialService {
    jwt: JwtService,
    ledger: Arc<dyn WalletLedger>,
    min_join_balance: i64,
    owners: RwLock<HashMap<String, String>>,
}

impl CredentialService {
    pub fn new(config: &AuthConfig, ledger: Arc<dyn WalletLedger>) -> Self {
        Self {
            jwt: JwtService::new(&config.jwt_secret, config.credential_ttl_secs),
            ledger,
            min_join_balance: config.min_join_balance,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Register `owner_id` as the owner of `channel_name`
    pub fn register_owner(&self, channel_name: &str, owner_id: &str) {
        self.owners
            .write()
            .insert(channel_name.to_string(), owner_id.to_string());
    }

    /// Forget the owner of `channel_name`
    pub fn unregister_owner(&self, channel_name: &str) -> bool {
        self.owners.write().remove(channel_name).is_some()
    }

    pub fn is_owner(&self, channel_name: &str, participant_id: &str) -> bool {
        self.owners
            .read()
            .get(channel_name)
            .map_or(false, |owner| owner == participant_id)
    }

    /// Validate a credential for `channel_name`
    ///
    /// # Errors
    ///
    /// `TokenExpired` / `InvalidToken` for bad tokens, `Credential` when the
    /// token is scoped to another channel.
    pub fn validate(&self, token: &str, channel_name: &str) -> AppResult<JoinClaims> {
        let claims = self.jwt.validate_token(token)?;
        if !claims.allows(channel_name) {
            return Err(AppError::Credential(format!(
                "Credential not valid for channel {}",
                channel_name
            )));
        }
        Ok(claims)
    }

    async fn has_funds(&self, participant_id: &str) -> AppResult<bool> {
        match self.ledger.balance(participant_id).await {
            Ok(balance) => Ok(balance.amount >= self.min_join_balance),
            Err(AppError::AccountNotFound(_)) => Ok(self.min_join_balance <= 0),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TokenIssuer for CredentialService {
    #[instrument(skip(self))]
    async fn issue_join_credential(
        &self,
        channel_name: &str,
        participant_id: &str,
    ) -> AppResult<JoinCredential> {
        let owner = self.is_owner(channel_name, participant_id);

        if !owner && !self.has_funds(participant_id).await? {
            warn!(participant = %participant_id, channel = %channel_name, "Join refused: insufficient balance");
            return Err(AppError::Credential(format!(
                "Insufficient balance to join {}",
                channel_name
            )));
        }

        let claims = JoinClaims::new(
            participant_id,
            channel_name,
            owner,
            self.jwt.expiration_secs(),
        );
        let credential = self.jwt.create_token(&claims)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AppError::Internal("Invalid credential expiry".to_string()))?;

        info!(participant = %participant_id, channel = %channel_name, owner, "Join credential issued");
        Ok(JoinCredential {
            credential,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::models::RevenueShare;
    use callmeter_core::traits::MockWalletLedger;
    use callmeter_ledger::MemoryLedger;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "credential-test-secret".to_string(),
            credential_ttl_secs: 600,
            min_join_balance: 1,
        }
    }

    fn service(balances: Vec<(&str, i64)>) -> CredentialService {
        let ledger = MemoryLedger::with_balances(RevenueShare::default(), balances);
        CredentialService::new(&config(), Arc::new(ledger))
    }

    #[tokio::test]
    async fn test_issue_scoped_credential() {
        let svc = service(vec![("alice", 100)]);

        let cred = svc.issue_join_credential("c1", "alice").await.unwrap();
        assert!(!cred.is_expired());

        let claims = svc.validate(&cred.credential, "c1").unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(!claims.owner);

        assert!(matches!(
            svc.validate(&cred.credential, "c2"),
            Err(AppError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_without_funds() {
        let svc = service(vec![("alice", 0)]);

        assert!(matches!(
            svc.issue_join_credential("c1", "alice").await,
            Err(AppError::Credential(_))
        ));
        assert!(matches!(
            svc.issue_join_credential("c1", "stranger").await,
            Err(AppError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_joins_without_funds() {
        let svc = service(vec![]);
        svc.register_owner("room-1", "host");

        let cred = svc.issue_join_credential("room-1", "host").await.unwrap();
        assert!(svc.validate(&cred.credential, "room-1").unwrap().owner);

        assert!(svc.unregister_owner("room-1"));
        assert!(svc.issue_join_credential("room-1", "host").await.is_err());
    }

    #[tokio::test]
    async fn test_ledger_outage_propagates() {
        let mut ledger = MockWalletLedger::new();
        ledger
            .expect_balance()
            .returning(|_| Err(AppError::TransientNetwork("down".to_string())));
        let svc = CredentialService::new(&config(), Arc::new(ledger));

        let err = svc.issue_join_credential("c1", "alice").await.unwrap_err();
        assert!(err.is_transient());
    }
}
