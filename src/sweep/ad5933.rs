//! AD5933 / AD5934 impedance converter register map and encodings.
//!
//! Pure functions only; the bus traffic lives in [`super::engine`].
//!
//! ```text
//!   CONTROL  0x80  D15..D12 command │ D10..D9 range │ D8 PGA gain
//!            0x81  D4 reset │ D3 clock source
//!   START    0x82..0x84   24-bit frequency code
//!   DELTA    0x85..0x87   24-bit frequency code
//!   STEPS    0x88..0x89   9-bit
//!   CYCLES   0x8A..0x8B   D10..D9 multiplier │ D8..D0 cycles
//!   STATUS   0x8F         D0 temp valid │ D1 data valid │ D2 sweep done
//!   TEMP     0x92..0x93   14-bit two's complement, 1/32 °C
//!   REAL     0x94..0x95   i16
//!   IMAG     0x96..0x97   i16
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SweepError;

/// 7-bit bus address (fixed by the part).
pub const I2C_ADDRESS: u8 = 0x0D;

/// On-chip oscillator frequency.
pub const INTERNAL_CLOCK_HZ: u32 = 16_776_000;

// ── Registers ─────────────────────────────────────────────────

pub mod reg {
    pub const CONTROL_HIGH: u8 = 0x80;
    pub const CONTROL_LOW: u8 = 0x81;
    pub const START_FREQ: u8 = 0x82;
    pub const DELTA_FREQ: u8 = 0x85;
    pub const NUM_STEPS: u8 = 0x88;
    pub const NUM_CYCLES: u8 = 0x8A;
    pub const STATUS: u8 = 0x8F;
    pub const TEMP_DATA: u8 = 0x92;
    pub const REAL_DATA: u8 = 0x94;
    pub const IMAG_DATA: u8 = 0x96;
}

/// Bus-level command codes (first byte of a write).
pub const SET_POINTER: u8 = 0xB0;
pub const BLOCK_WRITE: u8 = 0xA0;
pub const BLOCK_READ: u8 = 0xA1;

pub mod status {
    pub const TEMP_VALID: u8 = 0x01;
    pub const DATA_VALID: u8 = 0x02;
    pub const SWEEP_DONE: u8 = 0x04;
}

// ── Control fields ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    NoOp = 0x0,
    InitStartFreq = 0x1,
    StartSweep = 0x2,
    IncrementFreq = 0x3,
    RepeatFreq = 0x4,
    MeasureTemp = 0x9,
    PowerDown = 0xA,
    Standby = 0xB,
}

/// Excitation output voltage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputRange {
    /// 2.0 V p-p
    Range1,
    /// 200 mV p-p
    Range2,
    /// 400 mV p-p
    Range3,
    /// 1.0 V p-p
    Range4,
}

impl OutputRange {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Range1 => 0b00,
            Self::Range2 => 0b11,
            Self::Range3 => 0b10,
            Self::Range4 => 0b01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PgaGain {
    X1,
    X5,
}

impl PgaGain {
    pub const fn bits(self) -> u8 {
        match self {
            Self::X1 => 1,
            Self::X5 => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSource {
    Internal,
    External,
}

impl ClockSource {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Internal => 0,
            Self::External => 1,
        }
    }
}

/// Multiplier applied to the settling cycle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlingMultiplier {
    Times1,
    Times2,
    Times4,
}

impl SettlingMultiplier {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Times1 => 0b00,
            Self::Times2 => 0b01,
            Self::Times4 => 0b11,
        }
    }

    pub const fn factor(self) -> u32 {
        match self {
            Self::Times1 => 1,
            Self::Times2 => 2,
            Self::Times4 => 4,
        }
    }
}

/// Which part is fitted; selects the master-clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontEndVariant {
    #[default]
    Ad5933,
    Ad5934,
}

impl FrontEndVariant {
    pub const fn clock_divider(self) -> u32 {
        match self {
            Self::Ad5933 => 4,
            Self::Ad5934 => 16,
        }
    }
}

/// Contents of the two control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub command: Command,
    pub range: OutputRange,
    pub gain: PgaGain,
    pub clock: ClockSource,
    pub reset: bool,
}

impl ControlWord {
    /// `[CONTROL_HIGH, CONTROL_LOW]` register values.
    pub const fn encode(&self) -> [u8; 2] {
        let high = ((self.command as u8) << 4) | (self.range.bits() << 1) | self.gain.bits();
        let low = ((self.reset as u8) << 4) | (self.clock.bits() << 3);
        [high, low]
    }
}

// ── Encodings ─────────────────────────────────────────────────

/// 24-bit frequency code: `round(f * 2^27 / (clock / divider))`.
pub fn frequency_code(
    frequency_hz: u32,
    clock_hz: u32,
    variant: FrontEndVariant,
) -> Result<u32, SweepError> {
    if clock_hz == 0 {
        return Err(SweepError::InvalidParameters("clock frequency is zero"));
    }
    let scaled = u64::from(frequency_hz) * (1u64 << 27) * u64::from(variant.clock_divider());
    let code = (scaled + u64::from(clock_hz) / 2) / u64::from(clock_hz);
    if code > 0x00FF_FFFF {
        return Err(SweepError::InvalidParameters("frequency code exceeds 24 bits"));
    }
    Ok(code as u32)
}

/// Register bytes for a 24-bit code, most significant first.
pub const fn code_bytes(code: u32) -> [u8; 3] {
    [(code >> 16) as u8, (code >> 8) as u8, code as u8]
}

/// NUM_STEPS register bytes.
pub const fn steps_bytes(steps: u16) -> [u8; 2] {
    [((steps >> 8) & 0x01) as u8, steps as u8]
}

/// NUM_CYCLES register bytes with the multiplier folded into the high byte.
pub const fn cycles_bytes(cycles: u16, multiplier: SettlingMultiplier) -> [u8; 2] {
    [
        (multiplier.bits() << 1) | ((cycles >> 8) & 0x01) as u8,
        cycles as u8,
    ]
}

/// Convert the 14-bit two's-complement temperature reading to whole °C.
pub const fn temperature_celsius(high: u8, low: u8) -> i16 {
    let raw = (((high as u16) << 8) | low as u16) & 0x3FFF;
    let signed = if raw & 0x2000 != 0 {
        raw as i16 - 0x4000
    } else {
        raw as i16
    };
    signed / 32
}
