//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    pub auth: AuthConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub consent: ConsentConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Redis configuration
///
/// When absent, the server keeps wallets and inboxes in process memory.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Key namespace prepended to every key
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "callmeter".to_string()
}

/// Join credential configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret for join credentials
    pub jwt_secret: String,

    /// Join credential lifetime in seconds
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_secs: i64,

    /// Minimum wallet balance a non-owner needs to obtain a join credential
    #[serde(default = "default_min_join_balance")]
    pub min_join_balance: i64,
}

fn default_credential_ttl() -> i64 {
    3600
}

fn default_min_join_balance() -> i64 {
    1
}

/// Signal channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SignalConfig {
    /// Invite time-to-live in seconds
    #[serde(default = "default_invite_ttl")]
    pub invite_ttl_secs: u64,

    /// Poll fallback interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Capacity of each per-user push topic
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

fn default_invite_ttl() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    3
}

fn default_topic_capacity() -> usize {
    64
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Percentage of each per-minute charge credited to the host
    #[serde(default = "default_host_share")]
    pub host_share_percent: u32,

    /// Bill 1:1 calls started from within a room session
    #[serde(default)]
    pub bill_room_sessions: bool,

    /// Billing tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_host_share() -> u32 {
    60
}

fn default_tick_interval() -> u64 {
    1000
}

/// Recording consent configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConsentConfig {
    /// Seconds to wait for a consent response before returning to idle
    #[serde(default = "default_consent_timeout")]
    pub response_timeout_secs: i64,
}

fn default_consent_timeout() -> i64 {
    30
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("auth.credential_ttl_secs", 3600)?
            .set_default("auth.min_join_balance", 1)?
            .set_default("signal.invite_ttl_secs", 60)?
            .set_default("signal.poll_interval_secs", 3)?
            .set_default("signal.topic_capacity", 64)?
            .set_default("billing.host_share_percent", 60)?
            .set_default("billing.bill_room_sessions", false)?
            .set_default("billing.tick_interval_ms", 1000)?
            .set_default("consent.response_timeout_secs", 30)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CALLMETER_ prefix
            .add_source(
                Environment::with_prefix("CALLMETER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CALLMETER").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            invite_ttl_secs: default_invite_ttl(),
            poll_interval_secs: default_poll_interval(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            host_share_percent: default_host_share(),
            bill_room_sessions: false,
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_consent_timeout(),
        }
    }
}
