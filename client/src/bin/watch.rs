//! Follows a cometa authority from the terminal.
//!
//! Connects as one user, runs the round engine locally, and logs what a player
//! would see: phase changes, the interpolated multiplier, the synthetic crowd,
//! and the user's bet. Optionally bets every round and cashes out at a target.

use anyhow::Context;
use clap::Parser;
use cometa_client::{
    driver::{self, Mailbox},
    Client, Config,
};
use cometa_engine::PresentationSnapshot;
use cometa_types::Phase;
use rand::{rngs::StdRng, SeedableRng};
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch cometa rounds as a player")]
struct Args {
    /// YAML config file; takes the place of --url and --user.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(long, default_value_t = 1)]
    user: u64,

    /// Emit logs as JSON.
    #[arg(long)]
    json: bool,

    /// Bet this many cents every round.
    #[arg(long)]
    bet: Option<u64>,

    /// Cash out once the displayed multiplier reaches this value.
    #[arg(long, requires = "bet")]
    cashout_at: Option<f64>,

    /// Interval between progress lines while flying.
    #[arg(long, default_value_t = 1_000)]
    report_ms: u64,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("could not read config file {}", path.display()))?;
            Config::from_yaml(&raw).context("could not parse config file")?
        }
        None => Config::new(args.url.clone(), args.user),
    };
    if args.json {
        config.json_logs = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();
    let config = load_config(&args)?.validate().context("invalid config")?;

    // Create logger
    let subscriber = tracing_subscriber::fmt().with_max_level(config.log_level);
    if config.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let client = Client::from_config(&config).context("invalid authority url")?;
    let (actor, mut mailbox) = driver::Actor::new(
        driver::Config {
            authority: client.clone(),
            user: config.user,
            engine: config.engine,
            frame_interval: config.frame_interval,
            mailbox_size: config.mailbox_size,
        },
        StdRng::from_entropy(),
    );
    let actor = actor.start();

    driver::bootstrap(&client, &mut mailbox)
        .await
        .context("initial fetch failed")?;
    let stream = client
        .connect_updates_with_capacity(config.update_buffer)
        .await
        .context("could not subscribe to updates")?;
    let feed = tokio::spawn(driver::forward(stream, mailbox.clone()));
    info!(url = %config.url, user = config.user, "watching rounds");

    tokio::select! {
        _ = follow(mailbox, args.bet, args.cashout_at, Duration::from_millis(args.report_ms)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    feed.abort();
    actor.abort();
    Ok(())
}

/// Logs snapshot changes and plays the optional bet/cashout strategy.
async fn follow(
    mut mailbox: Mailbox,
    bet: Option<u64>,
    cashout_at: Option<f64>,
    report_every: Duration,
) {
    let mut snapshots = mailbox.snapshots();
    let mut last = PresentationSnapshot::default();
    let mut last_report = tokio::time::Instant::now();
    loop {
        if snapshots.changed().await.is_err() {
            warn!("driver stopped");
            return;
        }
        let snapshot = snapshots.borrow_and_update().clone();

        if snapshot.phase != last.phase || snapshot.round_id != last.round_id {
            report_phase(&snapshot);
            if snapshot.phase == Some(Phase::Betting) {
                if let Some(amount) = bet {
                    match mailbox.place_bet(amount).await {
                        Ok(Ok(())) => info!(amount, "bet accepted"),
                        Ok(Err(reason)) => warn!(amount, %reason, "bet refused"),
                        Err(err) => warn!(?err, "driver unavailable"),
                    }
                }
            }
        }
        if snapshot.feed_stale && !last.feed_stale {
            warn!("feed is stale, showing last known round");
        }

        if snapshot.phase == Some(Phase::Flying) {
            if let Some(target) = cashout_at {
                let ready = snapshot.has_active_bet
                    && !snapshot.cashing_out
                    && !snapshot.has_cashed_out
                    && snapshot.display_multiplier >= target;
                if ready {
                    match mailbox.cashout().await {
                        Ok(Ok(receipt)) => info!(
                            multiplier = receipt.multiplier,
                            amount = receipt.amount,
                            "cashed out"
                        ),
                        Ok(Err(reason)) => warn!(%reason, "cashout refused"),
                        Err(err) => warn!(?err, "driver unavailable"),
                    }
                }
            }
            if last_report.elapsed() >= report_every {
                info!(
                    multiplier = %format!("{:.2}x", snapshot.display_multiplier),
                    progress = %format!("{:.0}%", snapshot.progress * 100.0),
                    crowd = snapshot.participant_count,
                    potential_payout = ?snapshot.potential_payout,
                    "flying"
                );
                last_report = tokio::time::Instant::now();
            }
        }
        last = snapshot;
    }
}

fn report_phase(snapshot: &PresentationSnapshot) {
    let Some(phase) = snapshot.phase else {
        return;
    };
    let round = snapshot.round_id.map(|id| id.to_string()).unwrap_or_default();
    match phase {
        Phase::Betting => info!(
            %round,
            closes_in_ms = snapshot.time_remaining_ms,
            balance = ?snapshot.balance,
            last_bet = ?snapshot.previous_bet.as_ref().map(|bet| bet.status),
            "betting open"
        ),
        Phase::Flying => info!(%round, crowd = snapshot.participant_count, "flying"),
        Phase::Crashed => info!(
            %round,
            multiplier = %format!("{:.2}x", snapshot.display_multiplier),
            bet = ?snapshot.bet.as_ref().map(|bet| bet.status),
            won = snapshot.cashout_amount,
            "crashed"
        ),
    }
}
