//! Runs a round engine against a live authority.
//!
//! The [Actor] owns the engine. A feed task pumps the authority's update
//! stream into its [Mailbox]; user actions go through the same mailbox, and the
//! rendered state comes back out as a stream of snapshots.

mod actor;
mod ingress;

use crate::{Client, Error};
pub use actor::Actor;
use cometa_types::{Update, UserId};
use futures::{Stream as FutStream, StreamExt};
pub use ingress::{Mailbox, MailboxError, Message};
use std::time::Duration;
use tracing::{info, warn};

pub struct Config<A> {
    pub authority: A,
    pub user: UserId,
    pub engine: cometa_engine::Config,
    pub frame_interval: Duration,
    pub mailbox_size: usize,
}

/// Seeds the engine with the current round and balance before the live stream
/// takes over.
pub async fn bootstrap(client: &Client, mailbox: &mut Mailbox) -> Result<(), Error> {
    match client.fetch_round().await? {
        Some(round) => {
            info!(round = %round.id, phase = %round.phase, "fetched current round");
            mailbox.feed(Update::Round(round)).await?;
        }
        None => info!("authority has not opened a round yet"),
    }
    let balance = client.fetch_balance().await?;
    mailbox
        .feed(Update::Balance {
            user: client.user,
            balance,
        })
        .await?;
    Ok(())
}

/// Pumps `stream` (usually a [crate::Stream] of updates) into `mailbox` until
/// either side goes away.
///
/// There is no reconnect: when the stream ends the engine keeps its last known
/// round and reports the feed as stale.
pub async fn forward<S>(mut stream: S, mut mailbox: Mailbox)
where
    S: FutStream<Item = Result<Update, Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(update) => {
                if mailbox.feed(update).await.is_err() {
                    info!("driver stopped, closing feed");
                    return;
                }
            }
            Err(Error::InvalidData(err)) => warn!(?err, "dropping undecodable frame"),
            Err(err) => {
                warn!(?err, "update stream ended");
                return;
            }
        }
    }
    warn!("update stream closed");
}
