//! Local interpolation of the multiplier curve between authoritative updates.
//!
//! The value produced here only drives what is drawn on screen. Payouts are
//! always computed by the authority.

/// Multiplier reached `elapsed_ms` after take-off on a curve with `growth_rate`.
pub fn multiplier(growth_rate: f64, elapsed_ms: u64) -> f64 {
    (growth_rate * elapsed_ms as f64).exp().max(1.0)
}

/// Fraction of the comet's track covered after `elapsed_ms`, clamped to `[0, 1]`.
pub fn progress(elapsed_ms: u64, budget_ms: u64) -> f64 {
    if budget_ms == 0 {
        return 1.0;
    }
    (elapsed_ms as f64 / budget_ms as f64).min(1.0)
}

/// A single per-frame reading of the curve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub elapsed_ms: u64,
    pub multiplier: f64,
    pub progress: f64,
}

#[derive(Clone, Copy, Debug)]
struct Flight {
    started_at: u64,
    growth_rate: f64,
}

/// Samples the curve of the round currently in flight.
#[derive(Clone, Debug)]
pub struct MultiplierPredictor {
    budget_ms: u64,
    flight: Option<Flight>,
}

impl MultiplierPredictor {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget_ms,
            flight: None,
        }
    }

    /// Begin sampling a flight that took off at `started_at` (epoch ms).
    pub fn start(&mut self, started_at: u64, growth_rate: f64) {
        self.flight = Some(Flight {
            started_at,
            growth_rate,
        });
    }

    pub fn stop(&mut self) {
        self.flight = None;
    }

    pub fn is_sampling(&self) -> bool {
        self.flight.is_some()
    }

    /// Reads the curve at `now`. A clock behind the flight start reads as take-off.
    pub fn sample(&self, now: u64) -> Option<Sample> {
        let flight = self.flight?;
        let elapsed_ms = now.saturating_sub(flight.started_at);
        Some(Sample {
            elapsed_ms,
            multiplier: multiplier(flight.growth_rate, elapsed_ms),
            progress: progress(elapsed_ms, self.budget_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROWTH: f64 = 0.000_03;

    #[test]
    fn test_multiplier_starts_at_one() {
        assert_eq!(multiplier(GROWTH, 0), 1.0);
    }

    #[test]
    fn test_multiplier_monotonic_and_floored() {
        let mut last = 0.0;
        for elapsed in (0..200_000).step_by(250) {
            let value = multiplier(GROWTH, elapsed);
            assert!(value >= 1.0);
            assert!(value >= last);
            last = value;
        }
    }

    #[test]
    fn test_multiplier_reference_point() {
        let value = multiplier(GROWTH, 5_000);
        assert!((value - 1.161_834).abs() < 1e-5);
    }

    #[test]
    fn test_progress_clamps() {
        assert_eq!(progress(0, 120_000), 0.0);
        assert_eq!(progress(60_000, 120_000), 0.5);
        assert_eq!(progress(500_000, 120_000), 1.0);
        assert_eq!(progress(10, 0), 1.0);
    }

    #[test]
    fn test_predictor_sampling_lifecycle() {
        let mut predictor = MultiplierPredictor::new(120_000);
        assert!(predictor.sample(10).is_none());

        predictor.start(1_000, GROWTH);
        let early = predictor.sample(500).unwrap();
        assert_eq!(early.elapsed_ms, 0);
        assert_eq!(early.multiplier, 1.0);

        let later = predictor.sample(61_000).unwrap();
        assert_eq!(later.elapsed_ms, 60_000);
        assert_eq!(later.progress, 0.5);

        predictor.stop();
        assert!(!predictor.is_sampling());
        assert!(predictor.sample(61_000).is_none());
    }
}
