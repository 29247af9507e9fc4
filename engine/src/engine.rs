use crate::{
    controller::{FeedError, RoundPhaseController, Transition},
    crowd::{CrowdSimulator, SyntheticParticipant},
    feed::FeedMonitor,
    ledger::{BetLedger, BetRecord, BetStatus, CashoutTicket, PlaceTicket},
    predictor::{self, MultiplierPredictor},
    scheduler::{Scheduler, SchedulerToken, Task},
    snapshot::PresentationSnapshot,
    Config,
};
use cometa_types::{
    BetRejection, CashoutError, CashoutReceipt, Phase, Round, Update, UserId,
};
use rand::Rng;
use tracing::{debug, info, warn};

/// What an [Update] changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Round(Transition),
    Bet,
    Balance,
    /// The frame concerned another user or a round no longer tracked.
    Ignored,
}

/// The crash game core.
///
/// Owns every piece of mutable state and is driven from a single execution
/// context: authoritative updates, deferred work coming due, user actions and
/// their resolutions. Reading a [PresentationSnapshot] never mutates anything.
pub struct Engine<R: Rng> {
    config: Config,
    controller: RoundPhaseController,
    predictor: MultiplierPredictor,
    ledger: BetLedger,
    crowd: CrowdSimulator<R>,
    feed: FeedMonitor,
    scheduler: Scheduler,
}

impl<R: Rng> Engine<R> {
    pub fn new(config: Config, user: UserId, rng: R) -> Self {
        let predictor = MultiplierPredictor::new(config.round_duration_budget_ms);
        let feed = FeedMonitor::new(config.stale_after_ms());
        let crowd = CrowdSimulator::new(config.crowd.clone(), rng);
        Self {
            config,
            controller: RoundPhaseController::new(),
            predictor,
            ledger: BetLedger::new(user),
            crowd,
            feed,
            scheduler: Scheduler::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn round(&self) -> Option<&Round> {
        self.controller.round()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.controller.phase()
    }

    pub fn token(&self) -> SchedulerToken {
        self.controller.token()
    }

    pub fn bet(&self) -> Option<&BetRecord> {
        self.ledger.record()
    }

    pub fn previous_bet(&self) -> Option<&BetRecord> {
        self.ledger.previous()
    }

    pub fn participants(&self) -> &[SyntheticParticipant] {
        self.crowd.participants()
    }

    pub fn is_stale(&self, now: u64) -> bool {
        self.feed.is_stale(now)
    }

    /// Earliest instant at which [Engine::run_due] has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// Merges a frame from the authority's update stream.
    pub fn apply_update(&mut self, update: Update, now: u64) -> Result<Applied, FeedError> {
        match update {
            Update::Round(round) => self.apply_round(round, now).map(Applied::Round),
            Update::Bet(echo) => {
                if self.ledger.apply_echo(&echo) {
                    Ok(Applied::Bet)
                } else {
                    debug!(user = echo.user, round = %echo.round_id, "ignoring bet echo");
                    Ok(Applied::Ignored)
                }
            }
            Update::Balance { user, balance } => {
                if user != self.ledger.user() {
                    return Ok(Applied::Ignored);
                }
                self.ledger.set_balance(balance);
                Ok(Applied::Balance)
            }
        }
    }

    /// Accepts an authoritative round snapshot and runs the phase transition it
    /// implies before returning.
    pub fn apply_round(&mut self, round: Round, now: u64) -> Result<Transition, FeedError> {
        self.feed.record(now);
        let transition = match self.controller.apply(round) {
            Ok(transition) => transition,
            Err(err) => {
                warn!(?err, "rejected round snapshot");
                return Err(err);
            }
        };
        if let Transition::Entered {
            phase, new_round, ..
        } = transition
        {
            self.enter(phase, new_round, now);
        }
        Ok(transition)
    }

    fn enter(&mut self, phase: Phase, new_round: bool, now: u64) {
        // The controller has already bumped the token.
        let token = self.controller.token();
        let Some(round) = self.controller.round().cloned() else {
            return;
        };
        info!(round = %round.id, %phase, new_round, generation = token.generation(), "entered phase");

        if new_round {
            self.crowd.clear();
        }
        self.ledger.begin_round(round.id);

        match phase {
            Phase::Betting => {
                self.predictor.stop();
                let duration = self.config.betting_duration_ms(&round);
                let delay = self
                    .crowd
                    .begin_seeding(now, round.betting_started_at, duration);
                self.scheduler
                    .schedule(token, now.saturating_add(delay), Task::SeedInsertion);
            }
            Phase::Flying => {
                if let Some(started_at) = round.flight_started_at {
                    self.predictor.start(started_at, round.growth_rate);
                }
                let delay = self.crowd.next_sweep_delay();
                self.scheduler
                    .schedule(token, now.saturating_add(delay), Task::RetirementSweep);
            }
            Phase::Crashed => {
                self.predictor.stop();
                self.crowd.clear();
                self.ledger.settle_crash(round.id);
            }
        }
    }

    /// Fires every deferred task due at or before `now`. Tasks scheduled under
    /// an older token are dropped without effect. Returns how many fired.
    pub fn run_due(&mut self, now: u64) -> usize {
        let mut fired = 0;
        while let Some((token, task)) = self.scheduler.pop_due(now) {
            if token != self.controller.token() {
                debug!(?task, generation = token.generation(), "dropping stale task");
                continue;
            }
            fired += 1;
            match task {
                Task::SeedInsertion => {
                    if let Some(delay) = self.crowd.insert(now) {
                        self.scheduler
                            .schedule(token, now.saturating_add(delay), Task::SeedInsertion);
                    } else {
                        debug!(population = self.crowd.len(), "crowd seeded");
                    }
                }
                Task::RetirementSweep => {
                    if let Some(sample) = self.predictor.sample(now) {
                        let retired = self.crowd.sweep(sample.multiplier);
                        if retired > 0 {
                            debug!(retired, multiplier = sample.multiplier, "crowd cashed out");
                        }
                    }
                    if !self.crowd.is_empty() {
                        let delay = self.crowd.next_sweep_delay();
                        self.scheduler.schedule(
                            token,
                            now.saturating_add(delay),
                            Task::RetirementSweep,
                        );
                    }
                }
            }
        }
        fired
    }

    /// Records an optimistic bet. The caller sends the request and hands the
    /// outcome to [Engine::resolve_place_bet].
    pub fn place_bet(&mut self, amount: u64) -> Result<PlaceTicket, BetRejection> {
        let Some(round) = self.controller.round() else {
            return Err(BetRejection::RoundClosed);
        };
        let (id, phase) = (round.id, round.phase);
        self.ledger.place(id, phase, amount)
    }

    pub fn resolve_place_bet(&mut self, ticket: PlaceTicket, result: Result<(), BetRejection>) {
        self.ledger.resolve_place(ticket, result);
    }

    /// Marks a cashout as outstanding. The request carries no multiplier; the
    /// authority computes the payout.
    pub fn cashout(&mut self) -> Result<CashoutTicket, CashoutError> {
        let round = self.controller.round().map(|round| round.id);
        self.ledger.begin_cashout(round, self.controller.phase())
    }

    pub fn resolve_cashout(
        &mut self,
        ticket: CashoutTicket,
        result: Result<CashoutReceipt, CashoutError>,
    ) {
        self.ledger.resolve_cashout(ticket, result);
    }

    /// Projects the current state for rendering at `now`.
    pub fn snapshot(&self, now: u64) -> PresentationSnapshot {
        let round = self.controller.round();
        let phase = round.map(|round| round.phase);

        let (display_multiplier, progress) = match round {
            Some(round) if round.phase == Phase::Crashed => {
                let elapsed = round
                    .flight_started_at
                    .map_or(0, |started_at| now.saturating_sub(started_at));
                (
                    round.final_multiplier.unwrap_or(1.0),
                    predictor::progress(elapsed, self.config.round_duration_budget_ms),
                )
            }
            Some(round) if round.phase == Phase::Flying => self
                .predictor
                .sample(now)
                .map_or((1.0, 0.0), |sample| (sample.multiplier, sample.progress)),
            _ => (1.0, 0.0),
        };

        let time_remaining_ms = match round {
            Some(round) if round.phase == Phase::Betting => {
                let duration = self.config.betting_duration_ms(round);
                round
                    .betting_started_at
                    .saturating_add(duration)
                    .saturating_sub(now)
            }
            _ => 0,
        };

        let bet = self.ledger.record().cloned();
        let has_active_bet = bet.as_ref().is_some_and(|bet| !bet.is_settled());
        let has_cashed_out = bet
            .as_ref()
            .is_some_and(|bet| bet.status == BetStatus::CashedOut);
        let cashout_amount = bet
            .as_ref()
            .filter(|bet| bet.status == BetStatus::CashedOut)
            .map_or(0, |bet| bet.won_amount);
        let potential_payout = bet
            .as_ref()
            .filter(|bet| phase == Some(Phase::Flying) && bet.status == BetStatus::Active)
            .map(|bet| (bet.amount as f64 * display_multiplier).floor() as u64);
        let placing_bet = bet
            .as_ref()
            .is_some_and(|bet| bet.status == BetStatus::Placing);

        PresentationSnapshot {
            round_id: round.map(|round| round.id),
            phase,
            display_multiplier,
            progress,
            time_remaining_ms,
            has_active_bet,
            has_cashed_out,
            cashout_amount,
            bet,
            previous_bet: self.ledger.previous().cloned(),
            potential_payout,
            placing_bet,
            cashing_out: self.ledger.cashout_in_flight(),
            balance: self.ledger.balance(),
            synthetic_participants: self.crowd.participants().to_vec(),
            participant_count: self.crowd.len(),
            feed_stale: self.feed.is_stale(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crowd::{CrowdConfig, DelayBand};
    use cometa_types::{BetEcho, RoundId};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const USER: UserId = 1;
    const GROWTH: f64 = 0.000_03;
    const T0: u64 = 1_700_000_000_000;

    fn engine() -> Engine<ChaCha20Rng> {
        engine_with(Config::default())
    }

    fn engine_with(config: Config) -> Engine<ChaCha20Rng> {
        let mut engine = Engine::new(config, USER, ChaCha20Rng::seed_from_u64(42));
        engine
            .apply_update(
                Update::Balance {
                    user: USER,
                    balance: 100_000,
                },
                T0,
            )
            .unwrap();
        engine
    }

    fn betting(id: u64, at: u64) -> Round {
        Round::betting(RoundId(id), at, 12_000, GROWTH)
    }

    /// Runs deferred work in small steps up to `until`.
    fn run_until(engine: &mut Engine<ChaCha20Rng>, from: u64, until: u64) {
        let mut now = from;
        while now <= until {
            engine.run_due(now);
            now += 10;
        }
    }

    #[test]
    fn test_scenario_display_multiplier_after_late_flying_push() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        assert_eq!(engine.snapshot(T0 + 2_000).time_remaining_ms, 10_000);

        // Local countdown reaching zero never flips the phase.
        let snapshot = engine.snapshot(T0 + 12_500);
        assert_eq!(snapshot.phase, Some(Phase::Betting));
        assert_eq!(snapshot.time_remaining_ms, 0);

        engine
            .apply_round(betting(1, T0).fly(T0 + 12_050), T0 + 13_000)
            .unwrap();
        let snapshot = engine.snapshot(T0 + 12_050 + 5_000);
        assert_eq!(snapshot.phase, Some(Phase::Flying));
        assert_eq!(snapshot.time_remaining_ms, 0);
        assert!((snapshot.display_multiplier - (GROWTH * 5_000.0).exp()).abs() < 1e-12);
        assert!((snapshot.display_multiplier - 1.161).abs() < 1e-3);
    }

    #[test]
    fn test_scenario_silent_feed_then_crash_settles_loss() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        let ticket = engine.place_bet(100).unwrap();
        assert!(engine.snapshot(T0).placing_bet);

        // Nothing arrives for five seconds.
        let snapshot = engine.snapshot(T0 + 5_000);
        assert!(snapshot.feed_stale);
        assert_eq!(snapshot.phase, Some(Phase::Betting));

        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000).crash(2.35), T0 + 20_000)
            .unwrap();
        let snapshot = engine.snapshot(T0 + 20_000);
        assert!(!snapshot.feed_stale);
        assert_eq!(snapshot.display_multiplier, 2.35);
        let bet = snapshot.bet.unwrap();
        assert_eq!(bet.status, BetStatus::Lost);
        assert_eq!(bet.won_amount, 0);
        assert!(!snapshot.has_cashed_out);

        // A late confirmation does not turn the loss into anything else.
        engine.resolve_place_bet(ticket, Ok(()));
        assert_eq!(engine.bet().unwrap().status, BetStatus::Lost);
    }

    #[test]
    fn test_scenario_place_bet_twice() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        let ticket = engine.place_bet(100).unwrap();
        assert_eq!(engine.place_bet(300), Err(BetRejection::AlreadyBet));
        engine.resolve_place_bet(ticket, Ok(()));
        assert_eq!(engine.bet().unwrap().amount, 100);
        assert_eq!(engine.bet().unwrap().status, BetStatus::Active);
    }

    #[test]
    fn test_cashout_outside_flight_never_touches_balance() {
        let mut engine = engine();
        assert_eq!(engine.cashout(), Err(CashoutError::RoundNotFlying));

        engine.apply_round(betting(1, T0), T0).unwrap();
        let ticket = engine.place_bet(100).unwrap();
        engine.resolve_place_bet(ticket, Ok(()));
        assert_eq!(engine.cashout(), Err(CashoutError::RoundNotFlying));

        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000).crash(1.01), T0 + 12_500)
            .unwrap();
        assert_eq!(engine.cashout(), Err(CashoutError::RoundAlreadyCrashed));
        assert_eq!(engine.snapshot(T0 + 12_500).balance, Some(100_000));
    }

    #[test]
    fn test_cashout_uses_authority_payout() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        let ticket = engine.place_bet(1_000).unwrap();
        engine.resolve_place_bet(ticket, Ok(()));
        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000), T0 + 12_000)
            .unwrap();

        let snapshot = engine.snapshot(T0 + 32_000);
        assert!(snapshot.has_active_bet);
        assert!(snapshot.potential_payout.unwrap() > 1_000);

        let cashout = engine.cashout().unwrap();
        assert!(engine.snapshot(T0 + 32_000).cashing_out);
        // The authority's figure is shown even though it differs from the local curve.
        engine.resolve_cashout(
            cashout,
            Ok(CashoutReceipt {
                amount: 1_790,
                multiplier: 1.79,
            }),
        );
        let snapshot = engine.snapshot(T0 + 33_000);
        assert!(snapshot.has_cashed_out);
        assert!(!snapshot.has_active_bet);
        assert_eq!(snapshot.cashout_amount, 1_790);
        assert_eq!(snapshot.potential_payout, None);
    }

    #[test]
    fn test_crowd_seeds_during_betting_and_clears_at_crash() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        assert_eq!(engine.snapshot(T0).participant_count, 0);

        run_until(&mut engine, T0, T0 + 12_000);
        let seeded = engine.participants().len();
        assert!(seeded > 0);
        assert!(seeded <= engine.config().crowd.max_population);

        // Flying keeps the population of the same round.
        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000), T0 + 12_000)
            .unwrap();
        assert_eq!(engine.participants().len(), seeded);

        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000).crash(1.5), T0 + 25_000)
            .unwrap();
        assert_eq!(engine.snapshot(T0 + 25_000).participant_count, 0);
        // Leftover seed and sweep tasks no longer touch anything.
        run_until(&mut engine, T0 + 25_000, T0 + 40_000);
        assert!(engine.participants().is_empty());
    }

    #[test]
    fn test_seeding_without_duration_uses_default_window() {
        let mut engine = engine();
        let round = Round::betting(RoundId(1), T0, 0, GROWTH);
        engine.apply_round(round, T0).unwrap();
        assert_eq!(
            engine.snapshot(T0).time_remaining_ms,
            engine.config().default_betting_duration_ms
        );

        // The start of a default-length window is early: no link waits longer
        // than the early band allows.
        let early_max = engine.config().crowd.early.max_ms;
        let mut now = T0;
        for _ in 0..5 {
            let Some(due) = engine.next_deadline() else {
                break;
            };
            assert!(due - now <= early_max, "late-band delay {}", due - now);
            now = due;
            engine.run_due(now);
        }
        assert!(engine.participants().len() >= 5);
    }

    #[test]
    fn test_stale_seed_chain_does_not_leak_into_next_round() {
        let config = Config {
            crowd: CrowdConfig {
                min_population: 60,
                max_population: 60,
                ..CrowdConfig::default()
            },
            ..Config::default()
        };
        let mut engine = engine_with(config);
        engine.apply_round(betting(1, T0), T0).unwrap();
        run_until(&mut engine, T0, T0 + 1_000);
        let token = engine.token();

        // Round 1 is abandoned mid-seed; round 2 opens much later.
        engine.apply_round(betting(2, T0 + 60_000), T0 + 60_000).unwrap();
        assert_ne!(engine.token(), token);
        assert_eq!(engine.participants().len(), 0);

        // Only round 2's chain inserts from here on.
        run_until(&mut engine, T0 + 60_000, T0 + 61_000);
        assert!(!engine.participants().is_empty());
        assert!(engine
            .participants()
            .iter()
            .all(|participant| participant.inserted_at >= T0 + 60_000));
    }

    #[test]
    fn test_crowd_retires_only_after_crossing() {
        let config = Config {
            crowd: CrowdConfig {
                min_population: 40,
                max_population: 40,
                burst_probability: 0.0,
                reaction_probability: 1.0,
                early: DelayBand::new(10, 20),
                mid: DelayBand::new(10, 20),
                late: DelayBand::new(10, 20),
                ..CrowdConfig::default()
            },
            ..Config::default()
        };
        let mut engine = engine_with(config);
        engine.apply_round(betting(1, T0), T0).unwrap();
        run_until(&mut engine, T0, T0 + 12_000);
        assert_eq!(engine.participants().len(), 40);

        let flight = T0 + 12_000;
        engine.apply_round(betting(1, T0).fly(flight), flight).unwrap();
        run_until(&mut engine, flight, flight + 60_000);

        // ln(5) / g is about 53.6s, so the last sweep ran well past 5x and
        // everyone who reacts instantly with a target at or below it has left.
        assert!(engine
            .participants()
            .iter()
            .all(|p| p.cashout_target.map_or(true, |target| target > 5.0)));
        assert!(engine.participants().iter().all(|p| p.inserted_at <= flight));
    }

    #[test]
    fn test_retirement_removal_at_or_after_crossing() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        run_until(&mut engine, T0, T0 + 12_000);
        let targets: Vec<(u64, Option<f64>)> = engine
            .participants()
            .iter()
            .map(|p| (p.local_id, p.cashout_target))
            .collect();

        let flight = T0 + 12_000;
        engine
            .apply_round(betting(1, T0).fly(flight), flight)
            .unwrap();
        let mut now = flight;
        while now < flight + 40_000 {
            engine.run_due(now);
            let current = predictor::multiplier(GROWTH, now - flight);
            for (id, target) in &targets {
                let present = engine.participants().iter().any(|p| p.local_id == *id);
                if !present {
                    // Removed: must have crossed.
                    let target = target.expect("null targets never exit");
                    assert!(target <= current);
                }
            }
            now += 10;
        }
    }

    #[test]
    fn test_duplicate_and_reordered_snapshots() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000), T0 + 12_100)
            .unwrap();
        let token = engine.token();

        // A delayed betting frame of the same round is refused.
        assert!(matches!(
            engine.apply_round(betting(1, T0), T0 + 12_200),
            Err(FeedError::Regression { .. })
        ));
        assert_eq!(engine.phase(), Some(Phase::Flying));
        assert_eq!(engine.token(), token);

        // A duplicate flying frame is absorbed.
        assert_eq!(
            engine
                .apply_round(betting(1, T0).fly(T0 + 12_000), T0 + 12_300)
                .unwrap(),
            Transition::Unchanged
        );
        assert_eq!(engine.token(), token);
    }

    #[test]
    fn test_phase_sequence_is_a_subsequence_of_the_cycle() {
        let mut engine = engine();
        let frames = vec![
            betting(1, T0),
            betting(1, T0).fly(T0 + 12_000),
            betting(1, T0),
            betting(1, T0).fly(T0 + 12_000).crash(1.4),
            betting(1, T0).fly(T0 + 12_000),
            betting(2, T0 + 20_000),
            betting(1, T0).fly(T0 + 12_000).crash(1.4),
            betting(2, T0 + 20_000).fly(T0 + 32_000).crash(3.0),
            betting(3, T0 + 40_000).fly(T0 + 52_000),
        ];
        let mut observed = Vec::new();
        for (i, frame) in frames.into_iter().enumerate() {
            if let Ok(Transition::Entered { phase, .. }) =
                engine.apply_round(frame, T0 + i as u64 * 100)
            {
                observed.push(phase);
            }
        }
        assert_eq!(
            observed,
            vec![
                Phase::Betting,
                Phase::Flying,
                Phase::Crashed,
                Phase::Betting,
                Phase::Crashed,
                Phase::Flying,
            ]
        );
        for pair in observed.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            // Within the cycle, every step moves forward (wrapping after Crashed).
            assert_ne!(from, to);
        }
    }

    #[test]
    fn test_bet_echo_and_balance_filtering() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();

        let other = Update::Balance {
            user: USER + 1,
            balance: 5,
        };
        assert_eq!(engine.apply_update(other, T0).unwrap(), Applied::Ignored);
        assert_eq!(engine.snapshot(T0).balance, Some(100_000));

        let echo = BetEcho {
            user: USER,
            round_id: RoundId(1),
            amount: 250,
            cashout_multiplier: None,
            won_amount: 0,
        };
        assert_eq!(
            engine.apply_update(Update::Bet(echo), T0).unwrap(),
            Applied::Bet
        );
        let snapshot = engine.snapshot(T0);
        assert!(snapshot.has_active_bet);
        assert_eq!(snapshot.bet.unwrap().amount, 250);
    }

    #[test]
    fn test_new_round_resets_bet() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        engine.place_bet(100).unwrap();
        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000).crash(1.1), T0 + 15_000)
            .unwrap();
        assert_eq!(engine.bet().unwrap().status, BetStatus::Lost);

        engine
            .apply_round(betting(2, T0 + 18_000), T0 + 18_000)
            .unwrap();
        assert!(engine.bet().is_none());
        assert_eq!(engine.previous_bet().unwrap().status, BetStatus::Lost);
        assert!(engine.place_bet(100).is_ok());
    }

    #[test]
    fn test_next_round_without_crash_frame_settles_loss() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        let ticket = engine.place_bet(1_000).unwrap();
        engine.resolve_place_bet(ticket, Ok(()));
        engine
            .apply_round(betting(1, T0).fly(T0 + 12_000), T0 + 12_000)
            .unwrap();
        assert_eq!(engine.bet().unwrap().status, BetStatus::Active);

        // The Crashed frame for round 1 is lost; round 2 opens.
        engine
            .apply_round(betting(2, T0 + 30_000), T0 + 30_000)
            .unwrap();
        assert!(engine.bet().is_none());
        let snapshot = engine.snapshot(T0 + 30_000);
        assert!(!snapshot.has_active_bet);
        let previous = snapshot.previous_bet.unwrap();
        assert_eq!(previous.round_id, RoundId(1));
        assert_eq!(previous.status, BetStatus::Lost);
        assert_eq!(previous.won_amount, 0);
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let mut engine = engine();
        engine.apply_round(betting(1, T0), T0).unwrap();
        run_until(&mut engine, T0, T0 + 3_000);
        let before = engine.snapshot(T0 + 3_000);
        for _ in 0..10 {
            assert_eq!(engine.snapshot(T0 + 3_000), before);
        }
        let json = serde_json::to_value(&before).unwrap();
        assert_eq!(json["phase"], "betting");
        assert!(json["syntheticParticipants"].is_array());
        assert!(json.get("feedStale").is_some());
    }
}
