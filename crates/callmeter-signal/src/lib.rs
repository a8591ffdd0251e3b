//! Call invite signaling for Callmeter
//!
//! Delivers call invitations to an idle party with low latency. Two
//! delivery paths run side by side and may both deliver the same invite:
//!
//! - **Push**: an `incoming` event on the callee's topic `user:{id}`
//! - **Poll**: the callee's short-TTL inbox, queried on an interval
//!
//! # Architecture
//!
//! ```text
//!  caller ── notify ──┬──> InviteStore (inbox, TTL)
//!                     └──> SignalTransport (topic user:{id})
//!                                 |
//!  callee  InviteListener ── push task ──┐
//!                         └─ poll task ──┴──> InviteResolver (first claim wins)
//!                                                   |
//!                                              ListenerEvent
//! ```

pub mod channel;
pub mod hub;
pub mod inbox;
pub mod listener;
pub mod resolver;

pub use channel::{NotifyOutcome, SignalChannel};
pub use hub::SignalHub;
pub use inbox::{MemoryInviteStore, RedisInviteStore};
pub use listener::{InviteListener, ListenerEvent};
pub use resolver::{DeliveryPath, InviteResolution, InviteResolver};

/// Signaling constants
pub mod constants {
    /// Prefix of per-user topics
    pub const USER_TOPIC_PREFIX: &str = "user";

    /// Number of invite ids remembered for duplicate suppression
    pub const SEEN_INVITES_CAPACITY: usize = 128;
}

/// Per-user topic name (`user:{id}`)
pub fn user_topic(user_id: &str) -> String {
    format!("{}:{}", constants::USER_TOPIC_PREFIX, user_id)
}
