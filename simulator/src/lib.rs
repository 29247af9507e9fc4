//! Local authority for cometa rounds.
//!
//! Runs the round cycle, accepts bets and cashouts, settles payouts, and pushes
//! every change to connected clients as binary [Update] frames. The crash point
//! is drawn from a plain RNG: this is a development backend, not a provably-fair
//! house.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State as AxumState},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cometa_engine::predictor;
use cometa_types::{
    api::{BalanceResponse, CashoutRequest, PlaceBetRequest},
    constants::{
        CRASH_COOLDOWN_MS, DEFAULT_BETTING_DURATION_MS, DEFAULT_GROWTH_RATE, EXPECTED_TICK_MS,
        STARTING_BALANCE,
    },
    BetEcho, BetRejection, CashoutError, CashoutReceipt, CashoutResponse, Phase, PlaceBetResponse,
    Round, RoundId, Update, UserId,
};
use commonware_codec::Encode;
use futures::{SinkExt, StreamExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone, Debug)]
pub struct Config {
    pub betting_duration_ms: u64,
    pub growth_rate: f64,
    pub cooldown_ms: u64,
    pub tick_ms: u64,
    /// Upper bound of drawn crash points.
    pub max_crash_point: f64,
    /// Crash every round at this multiplier instead of drawing one.
    pub fixed_crash_point: Option<f64>,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            betting_duration_ms: DEFAULT_BETTING_DURATION_MS,
            growth_rate: DEFAULT_GROWTH_RATE,
            cooldown_ms: CRASH_COOLDOWN_MS,
            tick_ms: EXPECTED_TICK_MS,
            max_crash_point: 100.0,
            fixed_crash_point: None,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Bet {
    amount: u64,
    cashout: Option<CashoutReceipt>,
}

struct State {
    round: Option<Round>,
    crash_point: f64,
    crashed_at: Option<u64>,
    bets: HashMap<UserId, Bet>,
    balances: HashMap<UserId, u64>,
    rng: StdRng,
}

impl State {
    fn balance(&self, user: UserId) -> u64 {
        self.balances
            .get(&user)
            .copied()
            .unwrap_or(STARTING_BALANCE)
    }

    fn echo(&self, user: UserId) -> Option<BetEcho> {
        let round = self.round.as_ref()?;
        let bet = self.bets.get(&user)?;
        Some(BetEcho {
            user,
            round_id: round.id,
            amount: bet.amount,
            cashout_multiplier: bet.cashout.map(|receipt| receipt.multiplier),
            won_amount: bet.cashout.map_or(0, |receipt| receipt.amount),
        })
    }

    /// Instant at which the flying round reaches its crash point.
    fn crash_due(&self, round: &Round) -> Option<u64> {
        let started_at = round.flight_started_at?;
        let elapsed = (self.crash_point.ln() / round.growth_rate).max(0.0);
        Some(started_at.saturating_add(elapsed.ceil() as u64))
    }
}

pub struct Simulator {
    config: Config,
    state: Arc<RwLock<State>>,
    update_tx: broadcast::Sender<Update>,
}

impl Simulator {
    pub fn new(config: Config) -> Self {
        let (update_tx, _) = broadcast::channel(1024);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = Arc::new(RwLock::new(State {
            round: None,
            crash_point: 1.0,
            crashed_at: None,
            bets: HashMap::new(),
            balances: HashMap::new(),
            rng,
        }));

        Self {
            config,
            state,
            update_tx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn update_subscriber(&self) -> broadcast::Receiver<Update> {
        self.update_tx.subscribe()
    }

    fn broadcast(&self, updates: Vec<Update>) {
        for update in updates {
            if let Err(e) = self.update_tx.send(update) {
                debug!("no subscribers for update: {}", e);
            }
        }
    }

    pub fn round(&self) -> Option<Round> {
        match self.state.read() {
            Ok(state) => state.round.clone(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in round: {}", e);
                None
            }
        }
    }

    pub fn balance(&self, user: UserId) -> u64 {
        match self.state.read() {
            Ok(state) => state.balance(user),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in balance: {}", e);
                0
            }
        }
    }

    /// Moves the round cycle forward to `now` and pushes the resulting snapshot.
    ///
    /// Called once per tick: the pushed snapshot doubles as the liveness signal
    /// clients use to detect a silent feed.
    pub fn tick(&self, now: u64) -> Option<Round> {
        let round = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!("Failed to acquire write lock in tick: {}", e);
                    return None;
                }
            };
            self.advance(&mut state, now);
            state.round.clone()
        };
        if let Some(round) = &round {
            self.broadcast(vec![Update::Round(round.clone())]);
        }
        round
    }

    fn advance(&self, state: &mut State, now: u64) {
        // A late tick may need several steps (e.g. betting closed and crash due).
        loop {
            let Some(round) = state.round.clone() else {
                self.open_round(state, RoundId(1), now);
                continue;
            };
            match round.phase {
                Phase::Betting => {
                    let closes_at = round.betting_ends_at();
                    if now < closes_at {
                        return;
                    }
                    let flying = round.fly(closes_at);
                    info!(round = %flying.id, crash_point = state.crash_point, "round flying");
                    state.round = Some(flying);
                }
                Phase::Flying => {
                    let Some(crash_at) = state.crash_due(&round) else {
                        return;
                    };
                    if now < crash_at {
                        return;
                    }
                    let crashed = round.crash(state.crash_point);
                    let lost = state
                        .bets
                        .values()
                        .filter(|bet| bet.cashout.is_none())
                        .count();
                    info!(round = %crashed.id, multiplier = state.crash_point, lost, "round crashed");
                    state.round = Some(crashed);
                    state.crashed_at = Some(crash_at);
                }
                Phase::Crashed => {
                    let reopens_at = state
                        .crashed_at
                        .unwrap_or(now)
                        .saturating_add(self.config.cooldown_ms);
                    if now < reopens_at {
                        return;
                    }
                    self.open_round(state, RoundId(round.id.0 + 1), reopens_at);
                }
            }
        }
    }

    fn open_round(&self, state: &mut State, id: RoundId, at: u64) {
        state.crash_point = match self.config.fixed_crash_point {
            Some(point) => point.max(1.0),
            None => draw_crash_point(&mut state.rng, self.config.max_crash_point),
        };
        state.crashed_at = None;
        state.bets.clear();
        state.round = Some(Round::betting(
            id,
            at,
            self.config.betting_duration_ms,
            self.config.growth_rate,
        ));
        info!(round = %id, "round open for bets");
    }

    pub fn place_bet(&self, user: UserId, amount: u64, now: u64) -> Result<(), BetRejection> {
        let updates = {
            let mut state = self.state.write().map_err(|e| {
                tracing::error!("Failed to acquire write lock in place_bet: {}", e);
                BetRejection::Unknown
            })?;
            let Some(round) = state.round.as_ref() else {
                return Err(BetRejection::RoundClosed);
            };
            if round.phase != Phase::Betting || now >= round.betting_ends_at() {
                return Err(BetRejection::RoundClosed);
            }
            let round_id = round.id;
            if amount == 0 {
                return Err(BetRejection::InvalidAmount);
            }
            if state.bets.contains_key(&user) {
                return Err(BetRejection::AlreadyBet);
            }
            let balance = state.balance(user);
            if amount > balance {
                return Err(BetRejection::InsufficientFunds);
            }
            state.balances.insert(user, balance - amount);
            state.bets.insert(
                user,
                Bet {
                    amount,
                    cashout: None,
                },
            );
            info!(user, round = %round_id, amount, "bet placed");
            let mut updates = Vec::with_capacity(2);
            if let Some(echo) = state.echo(user) {
                updates.push(Update::Bet(echo));
            }
            updates.push(Update::Balance {
                user,
                balance: balance - amount,
            });
            updates
        };
        self.broadcast(updates);
        Ok(())
    }

    /// Pays `user` at the multiplier reached when the request is processed.
    pub fn cashout(&self, user: UserId, now: u64) -> Result<CashoutReceipt, CashoutError> {
        let (receipt, updates) = {
            let mut state = self.state.write().map_err(|e| {
                tracing::error!("Failed to acquire write lock in cashout: {}", e);
                CashoutError::Unknown
            })?;
            let Some(round) = state.round.clone() else {
                return Err(CashoutError::RoundNotFlying);
            };
            match round.phase {
                Phase::Betting => return Err(CashoutError::RoundNotFlying),
                Phase::Crashed => return Err(CashoutError::RoundAlreadyCrashed),
                Phase::Flying => {}
            }
            // The loop may not have ticked past the crash yet.
            if state.crash_due(&round).is_some_and(|crash_at| now >= crash_at) {
                return Err(CashoutError::RoundAlreadyCrashed);
            }
            let Some(flight_started_at) = round.flight_started_at else {
                return Err(CashoutError::RoundNotFlying);
            };
            let Some(bet) = state.bets.get(&user).cloned() else {
                return Err(CashoutError::NoActiveBet);
            };
            if bet.cashout.is_some() {
                return Err(CashoutError::AlreadyCashedOut);
            }

            let elapsed = now.saturating_sub(flight_started_at);
            let multiplier = (predictor::multiplier(round.growth_rate, elapsed) * 100.0).floor()
                / 100.0;
            let multiplier = multiplier.clamp(1.0, state.crash_point);
            let receipt = CashoutReceipt {
                amount: (bet.amount as f64 * multiplier).floor() as u64,
                multiplier,
            };
            let balance = state.balance(user).saturating_add(receipt.amount);
            state.balances.insert(user, balance);
            if let Some(bet) = state.bets.get_mut(&user) {
                bet.cashout = Some(receipt);
            }
            info!(user, round = %round.id, multiplier, won = receipt.amount, "cashed out");

            let mut updates = Vec::with_capacity(2);
            if let Some(echo) = state.echo(user) {
                updates.push(Update::Bet(echo));
            }
            updates.push(Update::Balance { user, balance });
            (receipt, updates)
        };
        self.broadcast(updates);
        Ok(receipt)
    }

    /// Frames a newly connected subscriber needs before the live stream.
    fn catch_up(&self, user: UserId) -> Vec<Update> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut updates = Vec::with_capacity(3);
        if let Some(round) = &state.round {
            updates.push(Update::Round(round.clone()));
        }
        if let Some(echo) = state.echo(user) {
            updates.push(Update::Bet(echo));
        }
        updates.push(Update::Balance {
            user,
            balance: state.balance(user),
        });
        updates
    }
}

/// Crash point with `P(crash > x) ~ 0.99 / x`.
fn draw_crash_point(rng: &mut impl Rng, max: f64) -> f64 {
    let u: f64 = rng.gen_range(0.0..1.0);
    let point = (0.99 / (1.0 - u)).clamp(1.0, max.max(1.0));
    (point * 100.0).floor() / 100.0
}

/// Drives the round cycle on the wall clock until aborted.
pub fn spawn_round_loop(simulator: Arc<Simulator>) -> JoinHandle<()> {
    let tick = Duration::from_millis(simulator.config.tick_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            simulator.tick(now_ms());
        }
    })
}

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        let router = Router::new()
            .route("/round", get(query_round))
            .route("/balance/:user", get(query_balance))
            .route("/bet", post(place_bet))
            .route("/cashout", post(cashout))
            .route("/updates/:user", get(updates_ws))
            .layer(cors);

        // Generous limits: this is a local backend, but a runaway client should
        // not starve the round loop.
        let governor_conf = GovernorConfigBuilder::default()
            .per_millisecond(1)
            .burst_size(10_000)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer {
                config: Arc::new(config),
            }),
            None => {
                warn!("invalid rate limit configuration, serving without one");
                router
            }
        };
        router.with_state(self.simulator.clone())
    }
}

async fn query_round(AxumState(simulator): AxumState<Arc<Simulator>>) -> impl IntoResponse {
    match simulator.round() {
        Some(round) => (StatusCode::OK, round.encode().to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, vec![]).into_response(),
    }
}

async fn query_balance(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(user): Path<UserId>,
) -> impl IntoResponse {
    Json(BalanceResponse {
        balance: simulator.balance(user),
    })
}

async fn place_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<PlaceBetRequest>,
) -> impl IntoResponse {
    let response = match simulator.place_bet(request.user, request.amount, now_ms()) {
        Ok(()) => PlaceBetResponse::accepted(),
        Err(reason) => {
            debug!(user = request.user, ?reason, "bet refused");
            PlaceBetResponse::rejected(reason)
        }
    };
    Json(response)
}

async fn cashout(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<CashoutRequest>,
) -> impl IntoResponse {
    Json(CashoutResponse::from(
        simulator.cashout(request.user, now_ms()),
    ))
}

async fn updates_ws(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(user): Path<UserId>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_updates_ws(socket, simulator, user))
}

/// Whether `update` may be shown to `user`. Round frames go to everyone.
fn is_visible_to(update: &Update, user: UserId) -> bool {
    match update {
        Update::Round(_) => true,
        Update::Bet(echo) => echo.user == user,
        Update::Balance { user: owner, .. } => *owner == user,
    }
}

async fn handle_updates_ws(
    socket: axum::extract::ws::WebSocket,
    simulator: Arc<Simulator>,
    user: UserId,
) {
    info!(user, "updates WebSocket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut updates = simulator.update_subscriber();

    for update in simulator.catch_up(user) {
        if sender
            .send(axum::extract::ws::Message::Binary(update.encode().to_vec()))
            .await
            .is_err()
        {
            warn!(user, "failed to send catch-up, client disconnected");
            return;
        }
    }

    loop {
        tokio::select! {
            // Handle incoming WebSocket messages (ping/pong/close)
            msg = receiver.next() => {
                match msg {
                    Some(Ok(axum::extract::ws::Message::Close(_))) => {
                        info!(user, "client closed WebSocket connection");
                        break;
                    }
                    Some(Ok(axum::extract::ws::Message::Ping(data))) => {
                        if sender.send(axum::extract::ws::Message::Pong(data)).await.is_err() {
                            warn!(user, "failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(user, ?e, "WebSocket error");
                        break;
                    }
                    None => {
                        info!(user, "WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        if !is_visible_to(&update, user) {
                            continue;
                        }
                        if sender
                            .send(axum::extract::ws::Message::Binary(update.encode().to_vec()))
                            .await
                            .is_err()
                        {
                            warn!(user, "failed to send update, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Round frames are full snapshots; the next one resyncs the client.
                        warn!(user, skipped, "WebSocket client lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("broadcast channel closed");
                        break;
                    }
                }
            }
        }
    }
    info!(user, "updates WebSocket handler exiting");
    let _ = sender.close().await;
}
