/// Growth exponent of the multiplier curve, per millisecond.
pub const DEFAULT_GROWTH_RATE: f64 = 0.000_03;

/// Length of the betting window when the authority does not publish one.
pub const DEFAULT_BETTING_DURATION_MS: u64 = 12_000;

/// Flight time over which the comet travels from the start to the end of its track.
pub const ROUND_DURATION_BUDGET_MS: u64 = 120_000;

/// Interval at which the authority is expected to push a snapshot.
pub const EXPECTED_TICK_MS: u64 = 1_000;

/// Credits granted to a user the authority has not seen before (in cents).
pub const STARTING_BALANCE: u64 = 100_000;

/// Pause between a crash and the opening of the next round.
pub const CRASH_COOLDOWN_MS: u64 = 3_000;
