use crate::round::{Round, RoundId};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Identifier of a real user as known to the authority.
pub type UserId = u64;

/// Realtime echo of a user's bet row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetEcho {
    pub user: UserId,
    pub round_id: RoundId,
    pub amount: u64,
    pub cashout_multiplier: Option<f64>,
    pub won_amount: u64,
}

impl Write for BetEcho {
    fn write(&self, writer: &mut impl BufMut) {
        self.user.write(writer);
        self.round_id.write(writer);
        self.amount.write(writer);
        self.cashout_multiplier.is_some().write(writer);
        if let Some(multiplier) = self.cashout_multiplier {
            multiplier.to_bits().write(writer);
        }
        self.won_amount.write(writer);
    }
}

impl Read for BetEcho {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let user = UserId::read(reader)?;
        let round_id = RoundId::read(reader)?;
        let amount = u64::read(reader)?;
        let cashout_multiplier = if bool::read(reader)? {
            Some(f64::from_bits(u64::read(reader)?))
        } else {
            None
        };
        let won_amount = u64::read(reader)?;
        Ok(Self {
            user,
            round_id,
            amount,
            cashout_multiplier,
            won_amount,
        })
    }
}

impl EncodeSize for BetEcho {
    fn encode_size(&self) -> usize {
        u64::SIZE
            + RoundId::SIZE
            + u64::SIZE
            + bool::SIZE
            + self.cashout_multiplier.map_or(0, |_| u64::SIZE)
            + u64::SIZE
    }
}

/// Frame pushed over the updates stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// Full-replace snapshot of the current round.
    Round(Round),
    /// Echo of the subscribed user's bet.
    Bet(BetEcho),
    /// Credits available to the subscribed user.
    Balance { user: UserId, balance: u64 },
}

impl Write for Update {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Update::Round(round) => {
                0u8.write(writer);
                round.write(writer);
            }
            Update::Bet(echo) => {
                1u8.write(writer);
                echo.write(writer);
            }
            Update::Balance { user, balance } => {
                2u8.write(writer);
                user.write(writer);
                balance.write(writer);
            }
        }
    }
}

impl Read for Update {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Update::Round(Round::read(reader)?)),
            1 => Ok(Update::Bet(BetEcho::read(reader)?)),
            2 => Ok(Update::Balance {
                user: UserId::read(reader)?,
                balance: u64::read(reader)?,
            }),
            _ => Err(Error::InvalidEnum(kind)),
        }
    }
}

impl EncodeSize for Update {
    fn encode_size(&self) -> usize {
        1 + match self {
            Update::Round(round) => round.encode_size(),
            Update::Bet(echo) => echo.encode_size(),
            Update::Balance { .. } => u64::SIZE * 2,
        }
    }
}

/// Reason the authority (or the local precondition check) refused a bet.
#[derive(ThisError, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetRejection {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("betting is closed for this round")]
    RoundClosed,
    #[error("a bet already exists for this round")]
    AlreadyBet,
    #[error("bet amount must be positive")]
    InvalidAmount,
    #[error("bet failed")]
    Unknown,
}

/// Reason a cashout did not pay out.
#[derive(ThisError, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashoutError {
    #[error("round crashed before the cashout was processed")]
    RoundAlreadyCrashed,
    #[error("no active bet for this round")]
    NoActiveBet,
    #[error("bet already cashed out")]
    AlreadyCashedOut,
    #[error("round is not flying")]
    RoundNotFlying,
    #[error("cashout failed")]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    pub user: UserId,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceBetResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BetRejection>,
}

impl PlaceBetResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: BetRejection) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }

    /// Collapses the response into a result; a refusal without a reason is `Unknown`.
    pub fn into_result(self) -> Result<(), BetRejection> {
        if self.accepted {
            Ok(())
        } else {
            Err(self.reason.unwrap_or(BetRejection::Unknown))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashoutRequest {
    pub user: UserId,
}

/// Payout computed by the authority at the instant it received the cashout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CashoutReceipt {
    pub amount: u64,
    pub multiplier: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CashoutResponse {
    Paid(CashoutReceipt),
    Failed { error: CashoutError },
}

impl CashoutResponse {
    pub fn into_result(self) -> Result<CashoutReceipt, CashoutError> {
        match self {
            CashoutResponse::Paid(receipt) => Ok(receipt),
            CashoutResponse::Failed { error } => Err(error),
        }
    }
}

impl From<Result<CashoutReceipt, CashoutError>> for CashoutResponse {
    fn from(result: Result<CashoutReceipt, CashoutError>) -> Self {
        match result {
            Ok(receipt) => CashoutResponse::Paid(receipt),
            Err(error) => CashoutResponse::Failed { error },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: u64,
}
