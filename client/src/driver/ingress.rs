use cometa_engine::{CashoutTicket, PlaceTicket, PresentationSnapshot};
use cometa_types::{BetRejection, CashoutError, CashoutReceipt, Update};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use thiserror::Error;
use tokio::sync::watch;

pub enum Message {
    Feed(Update),
    PlaceBet {
        amount: u64,
        response: oneshot::Sender<Result<(), BetRejection>>,
    },
    Cashout {
        response: oneshot::Sender<Result<CashoutReceipt, CashoutError>>,
    },
    Placed {
        ticket: PlaceTicket,
        result: Result<(), BetRejection>,
        response: oneshot::Sender<Result<(), BetRejection>>,
    },
    CashedOut {
        ticket: CashoutTicket,
        result: Result<CashoutReceipt, CashoutError>,
        response: oneshot::Sender<Result<CashoutReceipt, CashoutError>>,
    },
}

#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
    snapshots: watch::Receiver<PresentationSnapshot>,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("driver mailbox closed")]
    Closed,
    #[error("driver request canceled")]
    Canceled,
}

impl Mailbox {
    pub(super) fn new(
        sender: mpsc::Sender<Message>,
        snapshots: watch::Receiver<PresentationSnapshot>,
    ) -> Self {
        Self { sender, snapshots }
    }

    /// Latest published snapshot, with change notification.
    pub fn snapshots(&self) -> watch::Receiver<PresentationSnapshot> {
        self.snapshots.clone()
    }

    async fn send(&mut self, message: Message) -> Result<(), MailboxError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| MailboxError::Closed)
    }

    /// Hands a frame from the authority to the engine.
    pub async fn feed(&mut self, update: Update) -> Result<(), MailboxError> {
        self.send(Message::Feed(update)).await
    }

    /// Places a bet and waits for the authority's verdict (or the local refusal).
    pub async fn place_bet(&mut self, amount: u64) -> Result<Result<(), BetRejection>, MailboxError> {
        let (response, receiver) = oneshot::channel();
        self.send(Message::PlaceBet { amount, response }).await?;
        receiver.await.map_err(|_| MailboxError::Canceled)
    }

    /// Cashes out and waits for the authority's receipt (or the local refusal).
    pub async fn cashout(
        &mut self,
    ) -> Result<Result<CashoutReceipt, CashoutError>, MailboxError> {
        let (response, receiver) = oneshot::channel();
        self.send(Message::Cashout { response }).await?;
        receiver.await.map_err(|_| MailboxError::Canceled)
    }
}
