//! Synthetic crowd shown next to the real game.
//!
//! The crowd is cosmetic. It reads the predicted multiplier and nothing else, and
//! nothing outside the presentation snapshot reads it.
//!
//! Seeding runs as a self-rescheduling chain during betting. Each link inserts one
//! participant and picks the next delay from a three-band profile (quick arrivals
//! early in the window, steadier ones mid-window, sparse and irregular ones late),
//! with an independent chance of a near-zero "burst" delay. Retirement runs as a
//! sweep at irregular intervals during flight.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive range of delays, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayBand {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayBand {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> u64 {
        let (low, high) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        rng.gen_range(low..=high)
    }
}

/// Tuning of the synthetic crowd.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdConfig {
    pub min_population: usize,
    pub max_population: usize,
    /// Delays while less than `early_fraction` of the betting window has elapsed.
    pub early: DelayBand,
    pub early_fraction: f64,
    /// Delays until `mid_fraction` of the window has elapsed.
    pub mid: DelayBand,
    pub mid_fraction: f64,
    /// Delays for the rest of the window, stretched by up to `late_jitter`.
    pub late: DelayBand,
    pub late_jitter: f64,
    pub burst_probability: f64,
    pub burst: DelayBand,
    /// Share of participants that never cash out.
    pub null_target_fraction: f64,
    /// Chance per sweep that a participant past its target leaves.
    pub reaction_probability: f64,
    pub sweep: DelayBand,
    /// Upper bound of sampled cashout targets.
    pub max_target: f64,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            min_population: 15,
            max_population: 60,
            early: DelayBand::new(80, 350),
            early_fraction: 0.25,
            mid: DelayBand::new(300, 900),
            mid_fraction: 0.7,
            late: DelayBand::new(700, 2_200),
            late_jitter: 0.6,
            burst_probability: 0.12,
            burst: DelayBand::new(0, 40),
            null_target_fraction: 0.1,
            reaction_probability: 0.6,
            sweep: DelayBand::new(150, 600),
            max_target: 50.0,
        }
    }
}

/// A fabricated bet displayed as another player.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticParticipant {
    pub local_id: u64,
    pub amount: u64,
    /// `None` never exits and busts with the round.
    pub cashout_target: Option<f64>,
    pub inserted_at: u64,
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started_at: u64,
    duration_ms: u64,
}

pub struct CrowdSimulator<R: Rng> {
    config: CrowdConfig,
    rng: R,
    participants: Vec<SyntheticParticipant>,
    target: usize,
    window: Option<Window>,
    next_id: u64,
}

impl<R: Rng> CrowdSimulator<R> {
    pub fn new(config: CrowdConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            participants: Vec::new(),
            target: 0,
            window: None,
            next_id: 0,
        }
    }

    pub fn participants(&self) -> &[SyntheticParticipant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Population this round is seeded towards.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Discards the whole population.
    pub fn clear(&mut self) {
        self.participants.clear();
        self.target = 0;
        self.window = None;
    }

    /// Starts a new population for a betting window and returns the delay before
    /// the first insertion.
    pub fn begin_seeding(&mut self, now: u64, betting_started_at: u64, duration_ms: u64) -> u64 {
        self.clear();
        let low = self.config.min_population.min(self.config.max_population);
        let high = self.config.min_population.max(self.config.max_population);
        self.target = self.rng.gen_range(low..=high);
        self.window = Some(Window {
            started_at: betting_started_at,
            duration_ms,
        });
        self.next_delay(now)
    }

    /// Inserts one participant and returns the delay before the next one, or `None`
    /// once the population target is reached.
    pub fn insert(&mut self, now: u64) -> Option<u64> {
        if self.participants.len() >= self.target {
            return None;
        }
        self.next_id += 1;
        let participant = SyntheticParticipant {
            local_id: self.next_id,
            amount: self.sample_amount(),
            cashout_target: self.sample_target(),
            inserted_at: now,
        };
        self.participants.push(participant);
        if self.participants.len() >= self.target {
            return None;
        }
        Some(self.next_delay(now))
    }

    /// Removes participants whose target `multiplier` has crossed, each with the
    /// configured reaction probability. Returns how many left.
    pub fn sweep(&mut self, multiplier: f64) -> usize {
        let before = self.participants.len();
        let reaction = chance(self.config.reaction_probability);
        let rng = &mut self.rng;
        self.participants.retain(|participant| match participant.cashout_target {
            Some(target) if target <= multiplier => !rng.gen_bool(reaction),
            _ => true,
        });
        before - self.participants.len()
    }

    /// Delay before the next retirement sweep; never zero.
    pub fn next_sweep_delay(&mut self) -> u64 {
        self.config.sweep.sample(&mut self.rng).max(1)
    }

    fn next_delay(&mut self, now: u64) -> u64 {
        if self.rng.gen_bool(chance(self.config.burst_probability)) {
            return self.config.burst.sample(&mut self.rng);
        }
        let fraction = match self.window {
            Some(window) if window.duration_ms > 0 => {
                now.saturating_sub(window.started_at) as f64 / window.duration_ms as f64
            }
            _ => 1.0,
        };
        if fraction < self.config.early_fraction {
            self.config.early.sample(&mut self.rng)
        } else if fraction < self.config.mid_fraction {
            self.config.mid.sample(&mut self.rng)
        } else {
            let base = self.config.late.sample(&mut self.rng) as f64;
            let stretch = 1.0 + self.rng.gen::<f64>() * self.config.late_jitter.max(0.0);
            (base * stretch) as u64
        }
    }

    /// Stake in cents: mostly small, a minority large.
    fn sample_amount(&mut self) -> u64 {
        let tier: f64 = self.rng.gen();
        if tier < 0.7 {
            self.rng.gen_range(1..=20) * 100
        } else if tier < 0.92 {
            self.rng.gen_range(4..=20) * 500
        } else {
            self.rng.gen_range(10..=100) * 1_000
        }
    }

    /// Cashout target: `P(target > x) ~ 0.97 / x`, with a fixed share never exiting.
    fn sample_target(&mut self) -> Option<f64> {
        if self.rng.gen_bool(chance(self.config.null_target_fraction)) {
            return None;
        }
        let u: f64 = self.rng.gen_range(0.0..1.0);
        let raw = 0.97 / (1.0 - u);
        let clamped = raw.clamp(1.01, self.config.max_target.max(1.01));
        Some((clamped * 100.0).round() / 100.0)
    }
}

/// `p` as a probability `gen_bool` accepts; NaN counts as never.
fn chance(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn crowd(seed: u64) -> CrowdSimulator<ChaCha20Rng> {
        CrowdSimulator::new(CrowdConfig::default(), ChaCha20Rng::seed_from_u64(seed))
    }

    fn seed_fully(crowd: &mut CrowdSimulator<ChaCha20Rng>) -> u64 {
        let mut now = crowd.begin_seeding(0, 0, 12_000);
        while let Some(delay) = crowd.insert(now) {
            now += delay;
        }
        now
    }

    #[test]
    fn test_population_bounded_by_target() {
        for seed in 0..20 {
            let mut crowd = crowd(seed);
            seed_fully(&mut crowd);
            let config = CrowdConfig::default();
            assert!(crowd.target() >= config.min_population);
            assert!(crowd.target() <= config.max_population);
            assert_eq!(crowd.len(), crowd.target());
            // The chain has ended; further insertions do nothing.
            assert_eq!(crowd.insert(50_000), None);
            assert_eq!(crowd.len(), crowd.target());
        }
    }

    #[test]
    fn test_begin_seeding_starts_empty() {
        let mut crowd = crowd(1);
        seed_fully(&mut crowd);
        assert!(!crowd.is_empty());
        crowd.begin_seeding(20_000, 20_000, 12_000);
        assert!(crowd.is_empty());
    }

    #[test]
    fn test_delay_profile_bands() {
        let config = CrowdConfig {
            burst_probability: 0.0,
            ..CrowdConfig::default()
        };
        let mut crowd = CrowdSimulator::new(config.clone(), ChaCha20Rng::seed_from_u64(3));
        crowd.begin_seeding(0, 0, 10_000);
        for _ in 0..100 {
            let early = crowd.next_delay(1_000);
            assert!((config.early.min_ms..=config.early.max_ms).contains(&early));
            let mid = crowd.next_delay(5_000);
            assert!((config.mid.min_ms..=config.mid.max_ms).contains(&mid));
            let late = crowd.next_delay(9_000);
            let ceiling = (config.late.max_ms as f64 * (1.0 + config.late_jitter)) as u64;
            assert!(late >= config.late.min_ms && late <= ceiling);
        }
    }

    #[test]
    fn test_bursts_happen() {
        let config = CrowdConfig {
            burst_probability: 1.0,
            ..CrowdConfig::default()
        };
        let mut crowd = CrowdSimulator::new(config.clone(), ChaCha20Rng::seed_from_u64(4));
        crowd.begin_seeding(0, 0, 10_000);
        for _ in 0..50 {
            assert!(crowd.next_delay(9_000) <= config.burst.max_ms);
        }
    }

    #[test]
    fn test_targets_skewed_with_null_share() {
        let mut crowd = crowd(5);
        let samples: Vec<_> = (0..5_000).map(|_| crowd.sample_target()).collect();
        let nulls = samples.iter().filter(|t| t.is_none()).count();
        assert!((350..=650).contains(&nulls), "nulls = {nulls}");

        let targets: Vec<f64> = samples.into_iter().flatten().collect();
        assert!(targets.iter().all(|t| (1.01..=50.0).contains(t)));
        let low = targets.iter().filter(|t| **t < 2.0).count();
        let high = targets.iter().filter(|t| **t >= 10.0).count();
        assert!(low > targets.len() / 3);
        assert!(high < targets.len() / 5);
    }

    #[test]
    fn test_amounts_skewed() {
        let mut crowd = crowd(6);
        let amounts: Vec<u64> = (0..2_000).map(|_| crowd.sample_amount()).collect();
        let small = amounts.iter().filter(|a| **a <= 2_000).count();
        let large = amounts.iter().filter(|a| **a > 10_000).count();
        assert!(small > amounts.len() / 2);
        assert!(large < amounts.len() / 5);
        assert!(amounts.iter().all(|a| *a > 0));
    }

    #[test]
    fn test_sweep_never_retires_before_crossing() {
        let config = CrowdConfig {
            reaction_probability: 1.0,
            ..CrowdConfig::default()
        };
        let mut crowd = CrowdSimulator::new(config, ChaCha20Rng::seed_from_u64(7));
        crowd.target = 3;
        crowd.participants = vec![
            SyntheticParticipant {
                local_id: 1,
                amount: 100,
                cashout_target: Some(1.8),
                inserted_at: 0,
            },
            SyntheticParticipant {
                local_id: 2,
                amount: 100,
                cashout_target: None,
                inserted_at: 0,
            },
            SyntheticParticipant {
                local_id: 3,
                amount: 100,
                cashout_target: Some(5.0),
                inserted_at: 0,
            },
        ];
        assert_eq!(crowd.sweep(1.79), 0);
        assert_eq!(crowd.sweep(1.8), 1);
        assert!(crowd.participants().iter().all(|p| p.local_id != 1));
        assert_eq!(crowd.sweep(1_000.0), 1);
        assert_eq!(crowd.participants()[0].cashout_target, None);
    }

    #[test]
    fn test_reaction_delay_spreads_removals() {
        let config = CrowdConfig {
            reaction_probability: 0.5,
            ..CrowdConfig::default()
        };
        let mut crowd = CrowdSimulator::new(config, ChaCha20Rng::seed_from_u64(8));
        crowd.target = 200;
        crowd.participants = (0..200)
            .map(|i| SyntheticParticipant {
                local_id: i,
                amount: 100,
                cashout_target: Some(1.5),
                inserted_at: 0,
            })
            .collect();
        let first = crowd.sweep(2.0);
        assert!(first > 0 && first < 200);
        let mut sweeps = 1;
        while !crowd.is_empty() {
            crowd.sweep(2.0);
            sweeps += 1;
        }
        assert!(sweeps > 1);
    }

    #[test]
    fn test_sweep_delay_positive() {
        let config = CrowdConfig {
            sweep: DelayBand::new(0, 0),
            ..CrowdConfig::default()
        };
        let mut crowd = CrowdSimulator::new(config, ChaCha20Rng::seed_from_u64(9));
        assert_eq!(crowd.next_sweep_delay(), 1);
    }

    #[test]
    fn test_nan_probabilities_never_fire() {
        let config = CrowdConfig {
            burst_probability: f64::NAN,
            null_target_fraction: f64::NAN,
            reaction_probability: f64::NAN,
            ..CrowdConfig::default()
        };
        let mut crowd = CrowdSimulator::new(config, ChaCha20Rng::seed_from_u64(5));
        let mut now = crowd.begin_seeding(0, 0, 12_000);
        while let Some(delay) = crowd.insert(now) {
            now += delay;
        }
        assert!(crowd
            .participants()
            .iter()
            .all(|participant| participant.cashout_target.is_some()));
        assert_eq!(crowd.sweep(f64::MAX), 0);
    }
}
