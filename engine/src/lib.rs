//! Client-side engine for the cometa crash game.
//!
//! The authority decides everything that matters (when rounds start, when they
//! crash, what a cashout pays). This crate keeps a local view of that truth and
//! interpolates between the authority's snapshots so a renderer can draw a smooth
//! multiplier curve, a countdown, and a believable crowd of other players.
//!
//! Everything here is synchronous and clock-injected: callers pass the current
//! time in Unix milliseconds to every operation that depends on it.

use cometa_types::{
    constants::{DEFAULT_BETTING_DURATION_MS, EXPECTED_TICK_MS, ROUND_DURATION_BUDGET_MS},
    Round,
};
use serde::{Deserialize, Serialize};

pub mod controller;
pub mod crowd;
mod engine;
pub mod feed;
pub mod ledger;
pub mod predictor;
pub mod scheduler;
mod snapshot;

pub use controller::{FeedError, RoundPhaseController, Transition};
pub use crowd::{CrowdConfig, CrowdSimulator, DelayBand, SyntheticParticipant};
pub use engine::{Applied, Engine};
pub use ledger::{BetLedger, BetRecord, BetStatus, CashoutTicket, PlaceTicket};
pub use predictor::{MultiplierPredictor, Sample};
pub use scheduler::{SchedulerToken, Task};
pub use snapshot::PresentationSnapshot;

/// Tuning of an [Engine].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval at which the authority is expected to push a snapshot.
    pub expected_tick_ms: u64,
    /// Silence after which the feed is reported stale. Twice the tick when unset.
    pub stale_after_ms: Option<u64>,
    /// Flight time mapped onto the full track of the comet.
    pub round_duration_budget_ms: u64,
    /// Betting window assumed when a snapshot carries none.
    pub default_betting_duration_ms: u64,
    pub crowd: CrowdConfig,
}

impl Config {
    pub fn stale_after_ms(&self) -> u64 {
        self.stale_after_ms
            .unwrap_or_else(|| self.expected_tick_ms.saturating_mul(2))
    }

    /// Betting window of `round`, or the default when the snapshot carries none.
    pub fn betting_duration_ms(&self, round: &Round) -> u64 {
        match round.betting_duration_ms {
            0 => self.default_betting_duration_ms,
            duration => duration,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expected_tick_ms: EXPECTED_TICK_MS,
            stale_after_ms: None,
            round_duration_budget_ms: ROUND_DURATION_BUDGET_MS,
            default_betting_duration_ms: DEFAULT_BETTING_DURATION_MS,
            crowd: CrowdConfig::default(),
        }
    }
}
