//! Channel-scoped join credentials for Callmeter
//!
//! This crate is the token-issuing collaborator: it signs short-lived JWTs
//! that let one participant join one channel.
//!
//! # Example
//!
//! ```no_run
//! use callmeter_auth::{JoinClaims, JwtService};
//!
//! let jwt = JwtService::new("your-secret-key", 3600);
//! let token = jwt.create_token(&JoinClaims::new("alice", "call-alice-bob-1", false, 3600))?;
//! let claims = jwt.validate_token(&token)?;
//! assert_eq!(claims.channel, "call-alice-bob-1");
//! # Ok::<(), callmeter_core::error::AppError>(())
//! ```

pub mod claims;
pub mod credential;
pub mod jwt;

pub use claims::JoinClaims;
pub use credential::CredentialService;
pub use jwt::JwtService;
