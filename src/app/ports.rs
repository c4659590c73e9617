//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Node / tasks (domain)
//! ```
//!
//! Driven adapters (flash, radio link, indicator LEDs, clock, event sinks)
//! implement these traits. The [`Node`](super::service::Node) and the task
//! loops consume them via generics, so the domain core never touches
//! ESP-IDF directly. The measurement front end is reached through
//! [`embedded_hal::i2c::I2c`] rather than a bespoke port.

use crate::storage::{FileId, FlashOp, RecordDesc, RecordKey};

// ───────────────────────────────────────────────────────────────
// Flash port (driven adapter: record store ↔ non-volatile memory)
// ───────────────────────────────────────────────────────────────

/// Raw keyed-record backend underneath [`RecordStore`](crate::storage::RecordStore).
///
/// Reads are synchronous. Mutations arrive one at a time through
/// [`execute`](FlashPort::execute) from the store's operation queue; the
/// store, not the backend, owns queueing and completion accounting.
///
/// Implementations MUST apply each operation atomically: a power cut leaves
/// either the old record or the new one, never a torn write.
pub trait FlashPort {
    /// Mount the backing partition.
    fn init(&mut self) -> Result<(), FlashError>;

    /// Locate the live record for `(file, key)`.
    fn find(&self, file: FileId, key: RecordKey) -> Result<Option<RecordDesc>, FlashError>;

    /// Stored length in bytes, including word padding.
    fn record_len(&self, desc: &RecordDesc) -> Result<usize, FlashError>;

    /// Copy the record into `buf`. Returns the number of bytes copied.
    fn read(&self, desc: &RecordDesc, buf: &mut [u8]) -> Result<usize, FlashError>;

    /// Words still available for new records.
    fn free_words(&self) -> u32;

    /// `true` while the backend cannot accept the next queued operation.
    fn is_busy(&self) -> bool {
        false
    }

    /// Apply one queued mutation.
    fn execute(&mut self, op: &FlashOp) -> Result<(), FlashError>;
}

// ───────────────────────────────────────────────────────────────
// Link port (driven adapter: wireless transfer ↔ radio stack)
// ───────────────────────────────────────────────────────────────

/// Connection-oriented notify/write link.
pub trait LinkPort {
    /// The radio stack finished bring-up.
    fn is_ready(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Largest notification payload for the current connection.
    fn max_payload(&self) -> usize;

    /// Next command byte written by the peer, if any.
    fn take_command(&mut self) -> Option<u8>;

    /// Send one notification. Fails if not connected or oversized.
    fn notify(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    fn start_advertising(&mut self) -> Result<(), LinkError>;

    fn is_advertising(&self) -> bool;

    fn set_device_name(&mut self, name: &str) -> Result<(), LinkError>;
}

// ───────────────────────────────────────────────────────────────
// Indicator port (driven adapter: domain → status LEDs)
// ───────────────────────────────────────────────────────────────

/// Status indication. Takes `&self`; several tasks share one indicator.
pub trait IndicatorPort {
    /// Acquisition in progress.
    fn set_busy(&self, on: bool);

    /// Heartbeat blink state.
    fn set_heartbeat(&self, on: bool);

    /// Persistent error indication. Never cleared until reset.
    fn set_fatal(&self);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time since boot.
pub trait ClockPort {
    fn uptime_ms(&self) -> u64;

    fn uptime_secs(&self) -> u32 {
        (self.uptime_ms() / 1_000) as u32
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`FlashPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// No live record for the key. A normal outcome for find/delete.
    NotFound,
    /// Partition is full.
    NoSpace,
    /// Operation before a successful [`FlashPort::init`].
    NotInitialized,
    /// Backend-specific failure code.
    Io(i32),
}

/// Errors from config encoding and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored record could not be decoded.
    SerializationFailed,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

/// Errors from [`LinkPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    NotConnected,
    /// Payload larger than the negotiated maximum.
    PayloadTooLarge,
    /// Negotiated maximum too small to carry a point.
    MtuTooSmall,
    /// Radio stack rejected the call with this code.
    Stack(i32),
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "record not found"),
            Self::NoSpace => write!(f, "no space"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::Io(code) => write!(f, "I/O error {}", code),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SerializationFailed => write!(f, "config encoding failed"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no peer connected"),
            Self::PayloadTooLarge => write!(f, "payload exceeds negotiated maximum"),
            Self::MtuTooSmall => write!(f, "negotiated payload too small"),
            Self::Stack(code) => write!(f, "radio stack error {}", code),
        }
    }
}
