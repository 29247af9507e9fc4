//! Round snapshots published by the authority.
//!
//! Wire format (all integers big-endian, floats as IEEE-754 bits):
//! [id:u64] [phase:u8] [bettingStartedAt:u64] [bettingDurationMs:u64]
//! [hasFlight:bool] [flightStartedAt:u64]? [hasFinal:bool] [finalMultiplier:f64]?
//! [growthRate:f64]

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a round, unique per round.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Write for RoundId {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for RoundId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(u64::read(reader)?))
    }
}

impl FixedSize for RoundId {
    const SIZE: usize = u64::SIZE;
}

/// Lifecycle phase of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    Betting = 0,
    Flying = 1,
    Crashed = 2,
}

impl Phase {
    /// Position of the phase inside a single round.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// The phase that follows `self` within the same round, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Betting => Some(Phase::Flying),
            Phase::Flying => Some(Phase::Crashed),
            Phase::Crashed => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Betting => "betting",
            Phase::Flying => "flying",
            Phase::Crashed => "crashed",
        };
        f.write_str(label)
    }
}

impl Write for Phase {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Phase {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        match value {
            0 => Ok(Self::Betting),
            1 => Ok(Self::Flying),
            2 => Ok(Self::Crashed),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for Phase {
    const SIZE: usize = 1;
}

/// Authoritative snapshot of the current round.
///
/// Snapshots are full replacements: a consumer never merges one field-by-field
/// with an older copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: RoundId,
    pub phase: Phase,
    /// Epoch milliseconds at which betting opened.
    pub betting_started_at: u64,
    pub betting_duration_ms: u64,
    /// Epoch milliseconds at which the flight began. Present iff flying or crashed.
    pub flight_started_at: Option<u64>,
    /// Frozen multiplier at the crash. Present iff crashed.
    pub final_multiplier: Option<f64>,
    /// Exponent of the multiplier curve, per millisecond.
    pub growth_rate: f64,
}

impl Round {
    /// A round that has just opened for bets.
    pub fn betting(
        id: RoundId,
        betting_started_at: u64,
        betting_duration_ms: u64,
        growth_rate: f64,
    ) -> Self {
        Self {
            id,
            phase: Phase::Betting,
            betting_started_at,
            betting_duration_ms,
            flight_started_at: None,
            final_multiplier: None,
            growth_rate,
        }
    }

    /// The same round after take-off at `flight_started_at`.
    pub fn fly(mut self, flight_started_at: u64) -> Self {
        self.phase = Phase::Flying;
        self.flight_started_at = Some(flight_started_at);
        self
    }

    /// The same round after crashing at `final_multiplier`.
    pub fn crash(mut self, final_multiplier: f64) -> Self {
        self.phase = Phase::Crashed;
        self.final_multiplier = Some(final_multiplier);
        self
    }

    /// Instant at which the betting window closes.
    pub fn betting_ends_at(&self) -> u64 {
        self.betting_started_at
            .saturating_add(self.betting_duration_ms)
    }

    /// Checks the field-presence invariants of the snapshot.
    pub fn validate(&self) -> Result<(), &'static str> {
        let has_flight = self.flight_started_at.is_some();
        let has_final = self.final_multiplier.is_some();
        match self.phase {
            Phase::Betting if has_flight || has_final => {
                return Err("betting round carries flight data")
            }
            Phase::Flying if !has_flight => return Err("flying round without flight start"),
            Phase::Flying if has_final => return Err("flying round carries final multiplier"),
            Phase::Crashed if !has_flight || !has_final => {
                return Err("crashed round without flight start or final multiplier")
            }
            _ => {}
        }
        if !self.growth_rate.is_finite() || self.growth_rate <= 0.0 {
            return Err("growth rate must be finite and positive");
        }
        if let Some(multiplier) = self.final_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err("final multiplier must be finite and at least 1");
            }
        }
        Ok(())
    }
}

fn write_f64(value: f64, writer: &mut impl BufMut) {
    value.to_bits().write(writer);
}

fn read_f64(reader: &mut impl Buf) -> Result<f64, Error> {
    Ok(f64::from_bits(u64::read(reader)?))
}

impl Write for Round {
    fn write(&self, writer: &mut impl BufMut) {
        self.id.write(writer);
        self.phase.write(writer);
        self.betting_started_at.write(writer);
        self.betting_duration_ms.write(writer);
        self.flight_started_at.is_some().write(writer);
        if let Some(flight_started_at) = self.flight_started_at {
            flight_started_at.write(writer);
        }
        self.final_multiplier.is_some().write(writer);
        if let Some(multiplier) = self.final_multiplier {
            write_f64(multiplier, writer);
        }
        write_f64(self.growth_rate, writer);
    }
}

impl Read for Round {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let id = RoundId::read(reader)?;
        let phase = Phase::read(reader)?;
        let betting_started_at = u64::read(reader)?;
        let betting_duration_ms = u64::read(reader)?;
        let flight_started_at = if bool::read(reader)? {
            Some(u64::read(reader)?)
        } else {
            None
        };
        let final_multiplier = if bool::read(reader)? {
            Some(read_f64(reader)?)
        } else {
            None
        };
        let growth_rate = read_f64(reader)?;

        let round = Self {
            id,
            phase,
            betting_started_at,
            betting_duration_ms,
            flight_started_at,
            final_multiplier,
            growth_rate,
        };
        round
            .validate()
            .map_err(|reason| Error::Invalid("Round", reason))?;
        Ok(round)
    }
}

impl EncodeSize for Round {
    fn encode_size(&self) -> usize {
        RoundId::SIZE
            + Phase::SIZE
            + u64::SIZE * 2
            + bool::SIZE
            + self.flight_started_at.map_or(0, |_| u64::SIZE)
            + bool::SIZE
            + self.final_multiplier.map_or(0, |_| u64::SIZE)
            + u64::SIZE
    }
}
