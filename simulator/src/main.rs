use anyhow::Context;
use clap::Parser;
use cometa_simulator::{spawn_round_loop, Api, Config, Simulator};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    #[arg(long, default_value_t = cometa_types::constants::DEFAULT_BETTING_DURATION_MS)]
    betting_duration_ms: u64,

    #[arg(long, default_value_t = cometa_types::constants::EXPECTED_TICK_MS)]
    tick_ms: u64,

    /// Crash every round at this multiplier (for demos).
    #[arg(long)]
    crash_at: Option<f64>,

    /// Seed for crash points, for reproducible sessions.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if let Some(point) = args.crash_at {
        anyhow::ensure!(point >= 1.0, "crash point must be at least 1.0 (got {point})");
    }
    let config = Config {
        betting_duration_ms: args.betting_duration_ms,
        tick_ms: args.tick_ms,
        fixed_crash_point: args.crash_at,
        seed: args.seed,
        ..Config::default()
    };

    let simulator = Arc::new(Simulator::new(config));
    let round_loop = spawn_round_loop(simulator.clone());
    let api = Api::new(simulator);
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error");
    round_loop.abort();
    served
}
