use crate::{
    driver::{ingress::Mailbox, Config, Message},
    gateway::Authority,
};
use cometa_engine::{Applied, Engine, PresentationSnapshot};
use cometa_types::{BetRejection, CashoutError};
use futures::{channel::mpsc, SinkExt, StreamExt};
use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Sole owner of an [Engine].
///
/// Feed frames, user actions, action resolutions, and deferred engine work are
/// all processed here, one at a time, so the engine never sees concurrent
/// mutation. Network calls run on spawned tasks and report back on a private
/// channel, so the actor stops once every [Mailbox] is dropped.
pub struct Actor<A: Authority, R: Rng + Send + 'static> {
    engine: Engine<R>,
    authority: A,
    frame_interval: Duration,
    mailbox: mpsc::Receiver<Message>,
    resolved: mpsc::Sender<Message>,
    resolutions: mpsc::Receiver<Message>,
    snapshots: watch::Sender<PresentationSnapshot>,
    stale: bool,
}

impl<A: Authority, R: Rng + Send + 'static> Actor<A, R> {
    pub fn new(config: Config<A>, rng: R) -> (Self, Mailbox) {
        let engine = Engine::new(config.engine, config.user, rng);
        let now = now_ms();
        let stale = engine.is_stale(now);
        let (snapshots, receiver) = watch::channel(engine.snapshot(now));

        // Create mailbox
        let (sender, mailbox) = mpsc::channel(config.mailbox_size);
        let (resolved, resolutions) = mpsc::channel(config.mailbox_size);
        let inbound = Mailbox::new(sender, receiver);

        (
            Self {
                engine,
                authority: config.authority,
                frame_interval: config.frame_interval,
                mailbox,
                resolved,
                resolutions,
                snapshots,
                stale,
            },
            inbound,
        )
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut frames = time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.engine.next_deadline();
            let wake = deadline.map_or_else(
                || Instant::now() + Duration::from_secs(3600),
                |due| Instant::now() + Duration::from_millis(due.saturating_sub(now_ms())),
            );

            tokio::select! {
                biased;

                message = self.mailbox.next() => {
                    let Some(message) = message else {
                        info!("mailbox closed");
                        break;
                    };
                    self.handle(message);
                }
                Some(resolution) = self.resolutions.next() => {
                    self.handle(resolution);
                }
                _ = time::sleep_until(wake), if deadline.is_some() => {
                    let fired = self.engine.run_due(now_ms());
                    debug!(fired, "ran deferred work");
                }
                _ = frames.tick() => {
                    self.publish();
                }
            }
        }
    }

    fn handle(&mut self, message: Message) {
        let now = now_ms();
        match message {
            Message::Feed(update) => match self.engine.apply_update(update, now) {
                Ok(Applied::Round(transition)) => {
                    debug!(?transition, "applied round snapshot");
                    // Anything made due by the transition runs before the next frame.
                    self.engine.run_due(now);
                    self.publish();
                }
                Ok(Applied::Ignored) => {}
                Ok(_) => self.publish(),
                // Already logged by the engine; the feed carries on.
                Err(_) => self.publish(),
            },
            Message::PlaceBet { amount, response } => {
                let ticket = match self.engine.place_bet(amount) {
                    Ok(ticket) => ticket,
                    Err(reason) => {
                        debug!(amount, ?reason, "bet refused locally");
                        let _ = response.send(Err(reason));
                        return;
                    }
                };
                self.publish();

                let authority = self.authority.clone();
                let mut resolved = self.resolved.clone();
                tokio::spawn(async move {
                    let result = match authority.place_bet(amount).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(?err, "placeBet request failed");
                            Err(BetRejection::Unknown)
                        }
                    };
                    let resolution = Message::Placed {
                        ticket,
                        result,
                        response,
                    };
                    if resolved.send(resolution).await.is_err() {
                        warn!("driver stopped before bet resolution");
                    }
                });
            }
            Message::Cashout { response } => {
                let ticket = match self.engine.cashout() {
                    Ok(ticket) => ticket,
                    Err(reason) => {
                        debug!(?reason, "cashout refused locally");
                        let _ = response.send(Err(reason));
                        return;
                    }
                };
                self.publish();

                let authority = self.authority.clone();
                let mut resolved = self.resolved.clone();
                tokio::spawn(async move {
                    let result = match authority.cashout().await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(?err, "cashout request failed");
                            Err(CashoutError::Unknown)
                        }
                    };
                    let resolution = Message::CashedOut {
                        ticket,
                        result,
                        response,
                    };
                    if resolved.send(resolution).await.is_err() {
                        warn!("driver stopped before cashout resolution");
                    }
                });
            }
            Message::Placed {
                ticket,
                result,
                response,
            } => {
                self.engine.resolve_place_bet(ticket, result);
                let _ = response.send(result);
                self.publish();
            }
            Message::CashedOut {
                ticket,
                result,
                response,
            } => {
                self.engine.resolve_cashout(ticket, result);
                let _ = response.send(result);
                self.publish();
            }
        }
    }

    fn publish(&mut self) {
        let now = now_ms();
        let stale = self.engine.is_stale(now);
        if stale != self.stale {
            if stale {
                warn!(
                    stale_after_ms = self.engine.config().stale_after_ms(),
                    "round feed went stale"
                );
            } else {
                info!("round feed recovered");
            }
            self.stale = stale;
        }
        self.snapshots.send_replace(self.engine.snapshot(now));
    }
}
