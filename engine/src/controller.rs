//! Round phase state machine.
//!
//! Phases only change in response to an authoritative snapshot. Within one round
//! the phase may only move forward (`Betting -> Flying -> Crashed`); a snapshot
//! for a different round starts a new cycle.

use crate::scheduler::SchedulerToken;
use cometa_types::{Phase, Round, RoundId};
use thiserror::Error;

/// Reason a snapshot was refused.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    #[error("invalid snapshot: {0}")]
    Invalid(&'static str),
    #[error("snapshot for round {got} predates current round {current}")]
    StaleRound { current: RoundId, got: RoundId },
    #[error("round {round} cannot move from {from} back to {to}")]
    Regression {
        round: RoundId,
        from: Phase,
        to: Phase,
    },
    #[error("round {round} changed frozen field {field}")]
    FrozenField { round: RoundId, field: &'static str },
}

/// Effect of accepting a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Same round, same phase: the snapshot replaced the old one.
    Unchanged,
    /// The controller entered `phase` of `round`.
    Entered {
        round: RoundId,
        phase: Phase,
        /// Phase of the previous snapshot, if any.
        from: Option<Phase>,
        /// Whether the previous snapshot belonged to another round.
        new_round: bool,
    },
}

/// Owner of the current round and the current scheduler token.
#[derive(Debug, Default)]
pub struct RoundPhaseController {
    round: Option<Round>,
    token: SchedulerToken,
}

impl RoundPhaseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.round.as_ref().map(|round| round.phase)
    }

    pub fn token(&self) -> SchedulerToken {
        self.token
    }

    /// Accepts `snapshot` as the new truth, or explains why it cannot be.
    ///
    /// On a phase change the token is bumped before this returns, so any deferred
    /// work checked afterwards already observes the new generation.
    pub fn apply(&mut self, snapshot: Round) -> Result<Transition, FeedError> {
        snapshot.validate().map_err(FeedError::Invalid)?;

        let Some(current) = self.round.as_ref() else {
            return Ok(self.enter(snapshot, None, true));
        };

        if snapshot.id != current.id {
            if snapshot.betting_started_at < current.betting_started_at {
                return Err(FeedError::StaleRound {
                    current: current.id,
                    got: snapshot.id,
                });
            }
            let from = current.phase;
            return Ok(self.enter(snapshot, Some(from), true));
        }

        if snapshot.phase.ordinal() < current.phase.ordinal() {
            return Err(FeedError::Regression {
                round: current.id,
                from: current.phase,
                to: snapshot.phase,
            });
        }
        if current.flight_started_at.is_some()
            && snapshot.flight_started_at != current.flight_started_at
        {
            return Err(FeedError::FrozenField {
                round: current.id,
                field: "flightStartedAt",
            });
        }
        if current.final_multiplier.is_some()
            && snapshot.final_multiplier != current.final_multiplier
        {
            return Err(FeedError::FrozenField {
                round: current.id,
                field: "finalMultiplier",
            });
        }

        if snapshot.phase == current.phase {
            self.round = Some(snapshot);
            return Ok(Transition::Unchanged);
        }
        let from = current.phase;
        Ok(self.enter(snapshot, Some(from), false))
    }

    fn enter(&mut self, snapshot: Round, from: Option<Phase>, new_round: bool) -> Transition {
        self.token = self.token.bump(snapshot.id);
        let transition = Transition::Entered {
            round: snapshot.id,
            phase: snapshot.phase,
            from,
            new_round,
        };
        self.round = Some(snapshot);
        transition
    }
}
