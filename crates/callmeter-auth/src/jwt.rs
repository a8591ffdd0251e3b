//! JWT signing and validation for join credentials

use crate::claims::JoinClaims;
use callmeter_core::error::AppError;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, error, warn};

/// Signs and validates HS256 join credentials
#[derive(Clone)]
pub struct JwtService {
    expiration_secs: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create a new JWT service
    ///
    /// # Arguments
    ///
    /// * `secret` - The secret key used to sign tokens
    /// * `expiration_secs` - Credential lifetime in seconds
    pub fn new(secret: &str, expiration_secs: i64) -> Self {
        Self {
            expiration_secs,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign claims into a token
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidToken` if encoding fails
    pub fn create_token(&self, claims: &JoinClaims) -> Result<String, AppError> {
        debug!(
            participant = %claims.sub,
            channel = %claims.channel,
            exp = claims.exp,
            "Creating join credential"
        );

        encode(&Header::default(), claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "Failed to create JWT token");
            AppError::InvalidToken(format!("Token creation failed: {}", e))
        })
    }

    /// Validate a token and extract its claims
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `AppError::TokenExpired` if the token has expired
    /// - `AppError::InvalidToken` if the signature or format is invalid
    pub fn validate_token(&self, token: &str) -> Result<JoinClaims, AppError> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let token_data =
            decode::<JoinClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        warn!("Token expired");
                        AppError::TokenExpired
                    }
                    _ => {
                        warn!(error = %e, "Invalid token");
                        AppError::InvalidToken(format!("Token validation failed: {}", e))
                    }
                }
            })?;

        let claims = token_data.claims;
        if claims.is_expired() {
            return Err(AppError::TokenExpired);
        }

        Ok(claims)
    }

    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("expiration_secs", &self.expiration_secs)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-key-for-jwt-testing-12345";

    #[test]
    fn test_create_and_validate_token() {
        let jwt = JwtService::new(TEST_SECRET, 3600);
        let claims = JoinClaims::new("alice", "c1", false, 3600);

        let token = jwt.create_token(&claims).unwrap();
        let decoded = jwt.validate_token(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn test_expired_token() {
        let jwt = JwtService::new(TEST_SECRET, 1);
        let claims = JoinClaims::new("alice", "c1", false, -10);
        let token = jwt.create_token(&claims).unwrap();

        assert!(matches!(
            jwt.validate_token(&token),
            Err(AppError::TokenExpired)
        ));
    }

    #[test]
    fn test_invalid_token() {
        let jwt = JwtService::new(TEST_SECRET, 3600);
        assert!(matches!(
            jwt.validate_token("invalid.token.here"),
            Err(AppError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_token_with_different_secret() {
        let signer = JwtService::new("secret1", 3600);
        let verifier = JwtService::new("secret2", 3600);

        let token = signer
            .create_token(&JoinClaims::new("alice", "c1", false, 3600))
            .unwrap();
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let jwt = JwtService::new("super-secret", 3600);
        let debug = format!("{:?}", jwt);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret"));
    }
}
