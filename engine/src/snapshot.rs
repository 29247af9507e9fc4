use crate::{crowd::SyntheticParticipant, ledger::BetRecord};
use cometa_types::{Phase, RoundId};
use serde::Serialize;

/// Read-only projection handed to rendering collaborators once per frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationSnapshot {
    pub round_id: Option<RoundId>,
    pub phase: Option<Phase>,
    pub display_multiplier: f64,
    /// Position of the comet along its track, in `[0, 1]`.
    pub progress: f64,
    pub time_remaining_ms: u64,
    pub has_active_bet: bool,
    pub has_cashed_out: bool,
    pub cashout_amount: u64,
    pub bet: Option<BetRecord>,
    /// Outcome of the bet held in the round before this one.
    pub previous_bet: Option<BetRecord>,
    /// Stake times the displayed multiplier. Display only.
    pub potential_payout: Option<u64>,
    pub placing_bet: bool,
    pub cashing_out: bool,
    pub balance: Option<u64>,
    pub synthetic_participants: Vec<SyntheticParticipant>,
    pub participant_count: usize,
    pub feed_stale: bool,
}
