//! The local user's bet for the current round.
//!
//! A bet is created optimistically when the user places it and is then
//! reconciled with whichever of the explicit response or the realtime echo
//! arrives first; the later of the two is a no-op. Settlement amounts always
//! come from the authority.

use cometa_types::{
    BetEcho, BetRejection, CashoutError, CashoutReceipt, Phase, RoundId, UserId,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle of a [BetRecord].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BetStatus {
    /// Sent to the authority, not yet confirmed.
    Placing,
    /// Confirmed and eligible for cashout once the round flies.
    Active,
    /// Cashout request outstanding.
    CashingOut,
    /// Paid out by the authority.
    CashedOut,
    /// Cashout was refused; the bet rides until the crash.
    Forfeited,
    /// Settled as a loss.
    Lost,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRecord {
    pub round_id: RoundId,
    pub amount: u64,
    pub cashout_multiplier: Option<f64>,
    pub won_amount: u64,
    pub status: BetStatus,
}

impl BetRecord {
    fn new(round_id: RoundId, amount: u64, status: BetStatus) -> Self {
        Self {
            round_id,
            amount,
            cashout_multiplier: None,
            won_amount: 0,
            status,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, BetStatus::CashedOut | BetStatus::Lost)
    }

    fn pay(&mut self, multiplier: f64, amount: u64) {
        self.status = BetStatus::CashedOut;
        self.cashout_multiplier = Some(multiplier);
        self.won_amount = amount;
    }
}

/// Handle for an outstanding placeBet request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaceTicket {
    pub round_id: RoundId,
    pub amount: u64,
}

/// Handle for an outstanding cashout request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CashoutTicket {
    pub round_id: RoundId,
}

/// Owner of the local user's bet for the current round.
#[derive(Debug)]
pub struct BetLedger {
    user: UserId,
    round: Option<RoundId>,
    record: Option<BetRecord>,
    previous: Option<BetRecord>,
    cashout_in_flight: bool,
    balance: Option<u64>,
}

impl BetLedger {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            round: None,
            record: None,
            previous: None,
            cashout_in_flight: false,
            balance: None,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Bet for the current round, if any.
    pub fn record(&self) -> Option<&BetRecord> {
        self.record.as_ref()
    }

    /// Final state of the bet held for the round before the current one.
    pub fn previous(&self) -> Option<&BetRecord> {
        self.previous.as_ref()
    }

    pub fn balance(&self) -> Option<u64> {
        self.balance
    }

    pub fn set_balance(&mut self, balance: u64) {
        self.balance = Some(balance);
    }

    pub fn cashout_in_flight(&self) -> bool {
        self.cashout_in_flight
    }

    /// Points the ledger at `round`. A bet held for another round moves to
    /// [BetLedger::previous]; if its crash was never seen it is settled as lost.
    pub fn begin_round(&mut self, round: RoundId) {
        if self.round == Some(round) {
            return;
        }
        self.previous = self.record.take().map(|mut record| {
            if !record.is_settled() {
                info!(round = %record.round_id, status = ?record.status, amount = record.amount, "round ended unseen, bet lost");
                record.status = BetStatus::Lost;
                record.won_amount = 0;
            }
            record
        });
        self.round = Some(round);
        self.cashout_in_flight = false;
    }

    /// Checks preconditions and records an optimistic bet.
    pub fn place(
        &mut self,
        round: RoundId,
        phase: Phase,
        amount: u64,
    ) -> Result<PlaceTicket, BetRejection> {
        if phase != Phase::Betting || self.round != Some(round) {
            return Err(BetRejection::RoundClosed);
        }
        if amount == 0 {
            return Err(BetRejection::InvalidAmount);
        }
        if self.record.is_some() {
            return Err(BetRejection::AlreadyBet);
        }
        if amount > self.balance.unwrap_or(0) {
            return Err(BetRejection::InsufficientFunds);
        }
        self.record = Some(BetRecord::new(round, amount, BetStatus::Placing));
        Ok(PlaceTicket {
            round_id: round,
            amount,
        })
    }

    /// Merges the authority's answer to a placeBet request.
    pub fn resolve_place(&mut self, ticket: PlaceTicket, result: Result<(), BetRejection>) {
        let Some(record) = self.record.as_mut().filter(|r| r.round_id == ticket.round_id) else {
            debug!(round = %ticket.round_id, "placeBet response for a round no longer tracked");
            return;
        };
        match result {
            Ok(()) => {
                if record.status == BetStatus::Placing {
                    record.status = BetStatus::Active;
                    info!(round = %ticket.round_id, amount = ticket.amount, "bet confirmed");
                }
            }
            Err(reason) => {
                if record.status == BetStatus::Placing {
                    self.record = None;
                    warn!(round = %ticket.round_id, ?reason, "bet rejected");
                } else {
                    warn!(round = %ticket.round_id, ?reason, "ignoring rejection of an already confirmed bet");
                }
            }
        }
    }

    /// Merges a realtime echo of the user's bet row.
    ///
    /// Returns whether the echo applied to the current round.
    pub fn apply_echo(&mut self, echo: &BetEcho) -> bool {
        if echo.user != self.user || Some(echo.round_id) != self.round {
            return false;
        }
        let record = self
            .record
            .get_or_insert_with(|| BetRecord::new(echo.round_id, echo.amount, BetStatus::Active));
        if record.status == BetStatus::Placing {
            record.status = BetStatus::Active;
            info!(round = %echo.round_id, amount = echo.amount, "bet confirmed by echo");
        }
        record.amount = echo.amount;
        if let Some(multiplier) = echo.cashout_multiplier {
            if record.status != BetStatus::CashedOut {
                record.pay(multiplier, echo.won_amount);
                self.cashout_in_flight = false;
                info!(round = %echo.round_id, multiplier, won = echo.won_amount, "cashout settled by echo");
            }
        }
        true
    }

    /// Checks preconditions and marks a cashout as outstanding.
    pub fn begin_cashout(
        &mut self,
        round: Option<RoundId>,
        phase: Option<Phase>,
    ) -> Result<CashoutTicket, CashoutError> {
        match phase {
            Some(Phase::Flying) => {}
            Some(Phase::Crashed) => return Err(CashoutError::RoundAlreadyCrashed),
            Some(Phase::Betting) | None => return Err(CashoutError::RoundNotFlying),
        }
        let Some(record) = self
            .record
            .as_mut()
            .filter(|r| Some(r.round_id) == round)
        else {
            return Err(CashoutError::NoActiveBet);
        };
        match record.status {
            BetStatus::Active => {}
            BetStatus::CashingOut | BetStatus::CashedOut => {
                return Err(CashoutError::AlreadyCashedOut)
            }
            BetStatus::Placing | BetStatus::Forfeited | BetStatus::Lost => {
                return Err(CashoutError::NoActiveBet)
            }
        }
        record.status = BetStatus::CashingOut;
        self.cashout_in_flight = true;
        Ok(CashoutTicket {
            round_id: record.round_id,
        })
    }

    /// Merges the authority's answer to a cashout request.
    ///
    /// A receipt always wins, even over a loss settled by a crash that overtook
    /// the response.
    pub fn resolve_cashout(
        &mut self,
        ticket: CashoutTicket,
        result: Result<CashoutReceipt, CashoutError>,
    ) {
        let Some(record) = self.record.as_mut().filter(|r| r.round_id == ticket.round_id) else {
            debug!(round = %ticket.round_id, "cashout response for a round no longer tracked");
            return;
        };
        self.cashout_in_flight = false;
        match result {
            Ok(receipt) => {
                if record.status != BetStatus::CashedOut {
                    record.pay(receipt.multiplier, receipt.amount);
                    info!(round = %ticket.round_id, multiplier = receipt.multiplier, won = receipt.amount, "cashed out");
                }
            }
            Err(CashoutError::RoundAlreadyCrashed) => {
                if record.status != BetStatus::CashedOut {
                    record.status = BetStatus::Lost;
                    record.won_amount = 0;
                    info!(round = %ticket.round_id, "cashout lost the race with the crash");
                }
            }
            Err(error) => {
                if record.status == BetStatus::CashingOut {
                    record.status = BetStatus::Forfeited;
                }
                warn!(round = %ticket.round_id, ?error, "cashout refused");
            }
        }
    }

    /// Settles whatever was not cashed out in `round` as a loss.
    pub fn settle_crash(&mut self, round: RoundId) {
        let Some(record) = self.record.as_mut().filter(|r| r.round_id == round) else {
            return;
        };
        if record.status == BetStatus::CashedOut || record.status == BetStatus::Lost {
            return;
        }
        record.status = BetStatus::Lost;
        record.won_amount = 0;
        info!(round = %round, amount = record.amount, "bet lost");
    }
}
