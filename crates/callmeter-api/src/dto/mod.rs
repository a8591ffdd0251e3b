//! Data Transfer Objects (DTOs) for API requests and responses

pub mod common;
pub mod credential;
pub mod invite;
pub mod wallet;

pub use common::*;
pub use credential::*;
pub use invite::*;
pub use wallet::*;
