//! Metered billing loop
//!
//! Once per second the loop looks at the session. Time accrues between two
//! consecutive observations that both saw the session connected with a
//! remote peer, measured on the clock rather than by counting ticks, so a
//! slow ledger call delays a charge but never loses billable time. Each time
//! the elapsed whole minutes pass the last charged minute, exactly one minute
//! is charged through an atomic split payment (payer debited, payee credited
//! its share).
//!
//! A failed charge leaves `last_charged_minute` untouched so the next tick
//! retries the same minute; insufficient funds end the session instead.

use async_trait::async_trait;
use callmeter_core::{
    models::{EndReason, HostRates, MediaKind, SessionStatus},
    traits::WalletLedger,
    AppError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::SECONDS_PER_MINUTE;
use crate::engine::CallEngine;
use crate::notice::CallNotice;

/// What the billing loop needs to know about a session
#[async_trait]
pub trait SessionProbe: Send + Sync {
    fn status(&self) -> SessionStatus;

    fn has_remote_peer(&self) -> bool;

    /// End the session; returns `false` if it had already ended
    async fn terminate(&self, reason: EndReason) -> bool;
}

#[async_trait]
impl SessionProbe for CallEngine {
    fn status(&self) -> SessionStatus {
        CallEngine::status(self)
    }

    fn has_remote_peer(&self) -> bool {
        CallEngine::has_remote_peer(self)
    }

    async fn terminate(&self, reason: EndReason) -> bool {
        self.end_call(reason).await
    }
}

/// Who pays whom, and how much
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPlan {
    pub payer_id: String,
    pub payee_id: String,
    pub media: MediaKind,
    pub rates: HostRates,
    /// `false` for room, free and simulated sessions
    pub billable: bool,
}

impl BillingPlan {
    pub fn rate_per_minute(&self) -> i64 {
        self.rates.rate_for(self.media)
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Billing has stopped, or the result arrived after the session ended
    Stopped,
    /// Not connected or no peer present; nothing accrued
    Waiting,
    /// A second accrued without reaching a new minute
    Accrued,
    /// A charge for this minute is already in flight
    InFlight,
    /// Minute advanced without a ledger call
    Exempt { minute: u64 },
    Charged {
        minute: u64,
        spent: i64,
        payer_balance: i64,
    },
    /// The session was ended for lack of funds
    OutOfFunds { required: i64, available: i64 },
    /// The charge failed and will be retried on the next tick
    Retry { minute: u64, error: AppError },
}

/// Counters exposed for observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeterSnapshot {
    pub elapsed_secs: u64,
    pub last_charged_minute: u64,
    pub spent: i64,
    pub stopped: bool,
}

#[derive(Default)]
struct MeterState {
    accrued: Duration,
    /// Last observation that saw the session live
    last_live: Option<Instant>,
    last_charged_minute: u64,
    spent: i64,
    in_flight: bool,
    stopped: bool,
}

/// Per-session billing meter
pub struct BillingMeter {
    plan: BillingPlan,
    ledger: Arc<dyn WalletLedger>,
    state: Mutex<MeterState>,
}

impl BillingMeter {
    pub fn new(plan: BillingPlan, ledger: Arc<dyn WalletLedger>) -> Self {
        Self {
            plan,
            ledger,
            state: Mutex::new(MeterState::default()),
        }
    }

    pub fn plan(&self) -> &BillingPlan {
        &self.plan
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        let st = self.state.lock();
        MeterSnapshot {
            elapsed_secs: st.accrued.as_secs(),
            last_charged_minute: st.last_charged_minute,
            spent: st.spent,
            stopped: st.stopped,
        }
    }

    /// Stop billing; results still in flight are ignored
    pub fn stop(&self) {
        self.state.lock().stopped = true;
    }

    /// Observe the session once and charge the next minute if one is due
    pub async fn on_tick(&self, probe: &dyn SessionProbe) -> TickOutcome {
        let minute = {
            let mut st = self.state.lock();
            if st.stopped {
                return TickOutcome::Stopped;
            }
            if probe.status() == SessionStatus::Ended {
                st.stopped = true;
                return TickOutcome::Stopped;
            }
            if probe.status() != SessionStatus::Connected || !probe.has_remote_peer() {
                st.last_live = None;
                return TickOutcome::Waiting;
            }

            let now = Instant::now();
            if let Some(previous) = st.last_live.replace(now) {
                st.accrued += now.saturating_duration_since(previous);
            }
            let elapsed_minutes = st.accrued.as_secs() / SECONDS_PER_MINUTE;
            if elapsed_minutes <= st.last_charged_minute {
                return TickOutcome::Accrued;
            }
            if st.in_flight {
                return TickOutcome::InFlight;
            }

            let minute = st.last_charged_minute + 1;
            if !self.plan.billable {
                st.last_charged_minute = minute;
                debug!(minute, "Exempt minute");
                return TickOutcome::Exempt { minute };
            }

            st.in_flight = true;
            minute
        };

        let amount = self.plan.rate_per_minute();
        let result = self
            .ledger
            .split_pay(&self.plan.payer_id, &self.plan.payee_id, amount)
            .await;

        let outcome = {
            let mut st = self.state.lock();
            st.in_flight = false;

            if st.stopped || probe.status() == SessionStatus::Ended {
                debug!(minute, "Ledger result arrived after session ended, ignored");
                return TickOutcome::Stopped;
            }

            match result {
                Ok(receipt) => {
                    st.last_charged_minute = minute;
                    st.spent += amount;
                    info!(
                        payer = %self.plan.payer_id,
                        payee = %self.plan.payee_id,
                        minute,
                        amount,
                        payer_balance = receipt.payer_balance,
                        "Minute charged"
                    );
                    TickOutcome::Charged {
                        minute,
                        spent: st.spent,
                        payer_balance: receipt.payer_balance,
                    }
                }
                Err(AppError::InsufficientFunds {
                    required,
                    available,
                }) => {
                    st.stopped = true;
                    warn!(payer = %self.plan.payer_id, minute, required, available, "Out of funds, ending call");
                    TickOutcome::OutOfFunds {
                        required,
                        available,
                    }
                }
                Err(error) => {
                    warn!(minute, error = %error, "Charge failed, retrying next tick");
                    TickOutcome::Retry { minute, error }
                }
            }
        };

        if matches!(outcome, TickOutcome::OutOfFunds { .. }) {
            probe.terminate(EndReason::OutOfFunds).await;
        }
        outcome
    }

    /// Drive the meter every `period` until `cancel` fires or billing stops
    pub fn spawn(
        self: Arc<Self>,
        probe: Arc<dyn SessionProbe>,
        period: Duration,
        cancel: CancellationToken,
        notices: broadcast::Sender<CallNotice>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.on_tick(probe.as_ref()).await {
                    TickOutcome::Stopped => break,
                    TickOutcome::Charged {
                        minute,
                        spent,
                        payer_balance,
                    } => {
                        let _ = notices.send(CallNotice::Charged {
                            minute,
                            spent,
                            payer_balance,
                        });
                    }
                    TickOutcome::OutOfFunds {
                        required,
                        available,
                    } => {
                        let _ = notices.send(CallNotice::OutOfFunds {
                            required,
                            available,
                        });
                        break;
                    }
                    _ => {}
                }
            }

            self.stop();
            debug!(payer = %self.plan.payer_id, "Billing loop finished");
        })
    }
}
