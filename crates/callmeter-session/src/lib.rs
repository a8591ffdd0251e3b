//! Call sessions for Callmeter
//!
//! This crate drives one participant's side of a call: joining the media
//! channel, metering the call minute by minute against the wallet ledger,
//! and running the recording consent handshake.
//!
//! # Architecture
//!
//! - `CallEngine` - session status machine over the media transport
//! - `BillingMeter` - per-second tick loop charging one minute at a time
//! - `ConsentWorkflow` - `REQ_REC` / `RES_REC_*` handshake gating capture
//! - `CallCoordinator` / `ActiveCall` - bind the three to one channel and
//!   publish `CallNotice`s
//! - `ApiClient` - token issuer and ledger hosted by a remote Callmeter API
//!
//! Each `ActiveCall` owns its own tasks and timers; calls share nothing but
//! the ledger.

pub mod billing;
pub mod call;
pub mod consent;
pub mod engine;
pub mod notice;
pub mod remote;

pub use billing::{BillingMeter, BillingPlan, MeterSnapshot, SessionProbe, TickOutcome};
pub use call::{ActiveCall, CallCoordinator, CallServices, RoomHost};
pub use consent::{ConsentWorkflow, DataChannel};
pub use engine::{CallEngine, EngineEvent};
pub use notice::CallNotice;
pub use remote::ApiClient;

/// Session constants
pub mod constants {
    /// Seconds of connected time per billed minute
    pub const SECONDS_PER_MINUTE: u64 = 60;

    /// Buffered engine events per subscriber
    pub const ENGINE_EVENT_CAPACITY: usize = 64;

    /// Buffered call notices per subscriber
    pub const NOTICE_CAPACITY: usize = 64;

    /// How often unanswered consent requests are checked for expiry
    pub const CONSENT_CHECK_INTERVAL_SECS: u64 = 1;
}
