//! Outbound seam for user actions.

use crate::{Client, Result};
use cometa_types::{BetRejection, CashoutError, CashoutReceipt};
use std::future::Future;

/// Something that can settle bets: the real authority, or a stand-in in tests.
///
/// The outer `Result` is a transport failure; the inner one is the authority's
/// answer. Implementations must not retry: neither action is idempotent.
pub trait Authority: Clone + Send + Sync + 'static {
    fn place_bet(
        &self,
        amount: u64,
    ) -> impl Future<Output = Result<std::result::Result<(), BetRejection>>> + Send;

    fn cashout(
        &self,
    ) -> impl Future<Output = Result<std::result::Result<CashoutReceipt, CashoutError>>> + Send;
}

impl Authority for Client {
    async fn place_bet(&self, amount: u64) -> Result<std::result::Result<(), BetRejection>> {
        Ok(Client::place_bet(self, amount).await?.into_result())
    }

    async fn cashout(&self) -> Result<std::result::Result<CashoutReceipt, CashoutError>> {
        Ok(Client::cashout(self).await?.into_result())
    }
}
