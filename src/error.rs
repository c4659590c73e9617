//! Unified error types for the sensor node firmware.
//!
//! Every subsystem has its own small `Copy` error enum; the Task
//! Coordinator funnels them into [`NodeError`] and uses
//! [`NodeError::is_fatal`] to decide between skipping a cycle, carrying
//! on, or halting in the error indication state.

use core::fmt;

use crate::app::ports::{ConfigError, FlashError, LinkError};

// ---------------------------------------------------------------------------
// Sweep acquisition errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepError {
    /// A register transaction on the two-wire bus failed (nack, arbitration).
    Bus,
    /// The status register never reported the awaited bit.
    PollTimeout,
    /// Step or cycle count does not fit the front end's 9-bit fields,
    /// or a frequency code overflows 24 bits.
    InvalidParameters(&'static str),
    /// `step()` was called with no sweep in progress.
    NotStarted,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "front-end bus error"),
            Self::PollTimeout => write!(f, "status poll retries exhausted"),
            Self::InvalidParameters(msg) => write!(f, "invalid sweep parameters: {msg}"),
            Self::NotStarted => write!(f, "no sweep in progress"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Flash is full, or the dataset id is beyond the stored-dataset limit.
    NoSpace,
    /// More operations were enqueued than the queue depth allows.
    QueueFull,
    /// A record exists but its contents do not decode.
    Corrupt(&'static str),
    /// The pending-operation counter stopped draining.
    Stalled,
    /// A backend failure outside the normal outcomes.
    Fatal(FlashError),
}

impl StoreError {
    /// No-space is the only store outcome the coordinator carries on from.
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::NoSpace)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no space left"),
            Self::QueueFull => write!(f, "operation queue full"),
            Self::Corrupt(what) => write!(f, "corrupt record: {what}"),
            Self::Stalled => write!(f, "pending operations stalled"),
            Self::Fatal(e) => write!(f, "flash failure: {e}"),
        }
    }
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::NoSpace => Self::NoSpace,
            other => Self::Fatal(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level node error
// ---------------------------------------------------------------------------

/// Every fallible coordinator operation returns this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    Sweep(SweepError),
    Store(StoreError),
    Config(ConfigError),
    Link(LinkError),
    /// Store or front-end bring-up failed at startup.
    Init(&'static str),
}

impl NodeError {
    /// Fatal errors halt normal operation until a device reset.
    pub const fn is_fatal(self) -> bool {
        match self {
            Self::Sweep(_) | Self::Link(_) | Self::Config(_) => false,
            Self::Store(e) => e.is_fatal(),
            Self::Init(_) => true,
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sweep(e) => write!(f, "sweep: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl From<SweepError> for NodeError {
    fn from(e: SweepError) -> Self {
        Self::Sweep(e)
    }
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ConfigError> for NodeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<LinkError> for NodeError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

/// Coordinator-wide `Result` alias.
pub type Result<T> = core::result::Result<T, NodeError>;
