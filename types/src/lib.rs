//! Types shared between the cometa engine, its host client, and the local authority.

pub mod api;
pub mod constants;
pub mod round;

pub use api::{
    BetEcho, BetRejection, CashoutError, CashoutReceipt, CashoutResponse, PlaceBetResponse,
    Update, UserId,
};
pub use round::{Phase, Round, RoundId};
