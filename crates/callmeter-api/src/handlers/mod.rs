//! HTTP request handlers

pub mod channels;
pub mod credentials;
pub mod health;
pub mod invites;
pub mod wallets;
pub mod ws;

pub use channels::configure as configure_channels;
pub use credentials::configure as configure_credentials;
pub use health::health_check;
pub use invites::configure as configure_invites;
pub use wallets::configure as configure_wallets;
pub use ws::{configure as configure_signal, ws_handler};
