//! Sweep acquisition — data model and the front-end state machine.
//!
//! ```text
//!   SweepParameters ──▶ SweepEngine (ad5933 register protocol) ──▶ SweepDataset
//!                                                                  ├─ freq[]
//!                                                                  ├─ real[]
//!                                                                  ├─ imag[]
//!                                                                  └─ Metadata
//! ```

pub mod ad5933;
pub mod engine;

pub use engine::{Step, SweepEngine, SweepPhase};

use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use ad5933::{ClockSource, FrontEndVariant, OutputRange, PgaGain, SettlingMultiplier};

/// Maximum value of the front end's 9-bit step and cycle fields.
pub const MAX_NINE_BIT: u16 = 0x1FF;
/// Most points one sweep can produce.
pub const MAX_POINTS: u32 = MAX_NINE_BIT as u32 + 1;

// ── Parameters ────────────────────────────────────────────────

/// Everything needed to program one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepParameters {
    /// Start frequency in Hz.
    pub start_hz: u32,
    /// Frequency increment per step in Hz.
    pub delta_hz: u32,
    /// Number of increments; the sweep measures `steps + 1` points.
    pub steps: u16,
    /// Settling cycles before each measurement.
    pub settling_cycles: u16,
    pub multiplier: SettlingMultiplier,
    pub range: OutputRange,
    pub gain: PgaGain,
    pub clock: ClockSource,
    /// Frequency of the selected system clock in Hz.
    pub clock_hz: u32,
}

impl Default for SweepParameters {
    fn default() -> Self {
        Self {
            start_hz: 1_000,
            delta_hz: 100,
            steps: 490,
            settling_cycles: 511,
            multiplier: SettlingMultiplier::Times4,
            range: OutputRange::Range1,
            gain: PgaGain::X1,
            clock: ClockSource::Internal,
            clock_hz: ad5933::INTERNAL_CLOCK_HZ,
        }
    }
}

impl SweepParameters {
    /// Points produced by one sweep.
    pub const fn num_points(&self) -> u32 {
        self.steps as u32 + 1
    }

    /// Nominal excitation frequency of point `index`.
    pub const fn frequency_at(&self, index: u32) -> u32 {
        self.start_hz.saturating_add(self.delta_hz.saturating_mul(index))
    }

    /// Time the excitation needs to settle before point `index` is
    /// measured, rounded up to whole milliseconds.
    pub fn settling_ms(&self, index: u32) -> u64 {
        let cycles = u64::from(self.settling_cycles) * u64::from(self.multiplier.factor());
        let hz = u64::from(self.frequency_at(index).max(1));
        (cycles * 1_000).div_ceil(hz)
    }

    /// Reject values the front end cannot represent.
    pub fn validate(&self, variant: FrontEndVariant) -> Result<(), SweepError> {
        if self.steps > MAX_NINE_BIT {
            return Err(SweepError::InvalidParameters("step count exceeds 511"));
        }
        if self.settling_cycles > MAX_NINE_BIT {
            return Err(SweepError::InvalidParameters("settling cycles exceed 511"));
        }
        if self.clock_hz == 0 {
            return Err(SweepError::InvalidParameters("clock frequency is zero"));
        }
        ad5933::frequency_code(self.start_hz, self.clock_hz, variant)?;
        ad5933::frequency_code(self.delta_hz, self.clock_hz, variant)?;
        Ok(())
    }
}

// ── Dataset ───────────────────────────────────────────────────

/// Summary stored alongside every dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub num_points: u32,
    /// Seconds since boot when the sweep was taken.
    pub time: u32,
    /// Front-end die temperature in whole °C.
    pub temperature: i16,
}

/// Encoded size of [`Metadata`] as persisted.
pub const METADATA_LEN: usize = 10;

impl Metadata {
    pub fn to_bytes(&self) -> [u8; METADATA_LEN] {
        let mut out = [0u8; METADATA_LEN];
        out[0..4].copy_from_slice(&self.num_points.to_le_bytes());
        out[4..8].copy_from_slice(&self.time.to_le_bytes());
        out[8..10].copy_from_slice(&self.temperature.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < METADATA_LEN {
            return None;
        }
        Some(Self {
            num_points: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            time: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            temperature: i16::from_le_bytes([bytes[8], bytes[9]]),
        })
    }
}

/// One measured point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub freq: u32,
    pub real: i16,
    pub imag: i16,
}

/// Three parallel arrays plus metadata. `meta.num_points` always equals
/// the array lengths; [`SweepDataset::is_consistent`] checks it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SweepDataset {
    pub freq: Vec<u32>,
    pub real: Vec<i16>,
    pub imag: Vec<i16>,
    pub meta: Metadata,
}

impl SweepDataset {
    pub fn with_capacity(points: usize) -> Self {
        Self {
            freq: Vec::with_capacity(points),
            real: Vec::with_capacity(points),
            imag: Vec::with_capacity(points),
            meta: Metadata::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    pub fn push(&mut self, point: Point) {
        self.freq.push(point.freq);
        self.real.push(point.real);
        self.imag.push(point.imag);
        self.meta.num_points = self.freq.len() as u32;
    }

    pub fn point(&self, index: usize) -> Option<Point> {
        Some(Point {
            freq: *self.freq.get(index)?,
            real: *self.real.get(index)?,
            imag: *self.imag.get(index)?,
        })
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.freq
            .iter()
            .zip(&self.real)
            .zip(&self.imag)
            .map(|((&freq, &real), &imag)| Point { freq, real, imag })
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.meta.num_points as usize;
        self.freq.len() == n && self.real.len() == n && self.imag.len() == n
    }
}
