//! Node configuration.
//!
//! [`Config`] is the single persisted bookkeeping record (device identity,
//! dataset counters, active sweep parameters). It is postcard-encoded into
//! the store's reserved config record. [`TimingConfig`] holds the task
//! periods; it is compiled in and never persisted.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::sweep::ad5933::FrontEndVariant;
use crate::sweep::SweepParameters;

/// Deletions tolerated before startup runs a reclamation pass.
pub const RECLAIM_THRESHOLD: u32 = 10;

/// Highest dataset id the store will accept.
pub const MAX_STORED_SWEEPS: u32 = 200;

/// Advertised-name prefix; the three id characters follow it.
pub const NAME_PREFIX: &str = "EMI_";
/// Length of the advertised name.
pub const NAME_LEN: usize = NAME_PREFIX.len() + 3;
/// Name bytes left in a legacy advertising packet after the flags field.
const ADV_NAME_ROOM: usize = 26;
const _: () = assert!(NAME_LEN <= ADV_NAME_ROOM);

/// Persisted bookkeeping root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Three ASCII capitals; all-zero until provisioned.
    pub device_id: [u8; 3],
    /// Datasets currently stored, ids `1..=num_sweeps`.
    pub num_sweeps: u32,
    /// Highest id fully streamed over the wireless link.
    pub num_sent: u32,
    /// Deletions since the last reclamation.
    pub num_deleted: u32,
    pub sweep: SweepParameters,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: [0; 3],
            num_sweeps: 0,
            num_sent: 0,
            num_deleted: 0,
            sweep: SweepParameters::default(),
        }
    }
}

impl Config {
    pub fn is_provisioned(&self) -> bool {
        self.device_id.iter().all(u8::is_ascii_uppercase)
    }

    pub fn has_unsent(&self) -> bool {
        self.num_sent < self.num_sweeps
    }

    /// `EMI_XYZ`. Unprovisioned id characters render as `_`.
    pub fn advertised_name(&self) -> Result<heapless::String<NAME_LEN>, ConfigError> {
        let mut name = heapless::String::new();
        name.push_str(NAME_PREFIX)
            .map_err(|_| ConfigError::ValidationFailed("advertised name too long"))?;
        for &b in &self.device_id {
            let c = if b.is_ascii_uppercase() { b as char } else { '_' };
            name.push(c)
                .map_err(|_| ConfigError::ValidationFailed("advertised name too long"))?;
        }
        Ok(name)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::SerializationFailed)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|_| ConfigError::SerializationFailed)
    }
}

/// Map three random bytes onto `'A'..='Z'`.
pub fn device_id_from_entropy(bytes: [u8; 3]) -> [u8; 3] {
    bytes.map(|b| b'A' + (u16::from(b) * 25 / 255) as u8)
}

/// Reject configs that would break the counters or the front end.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.num_sent > config.num_sweeps {
        return Err(ConfigError::ValidationFailed(
            "num_sent must not exceed num_sweeps",
        ));
    }
    if config.num_sweeps > MAX_STORED_SWEEPS {
        return Err(ConfigError::ValidationFailed(
            "num_sweeps exceeds the stored-dataset limit",
        ));
    }
    if config.device_id != [0; 3] && !config.is_provisioned() {
        return Err(ConfigError::ValidationFailed(
            "device_id must be three ASCII capitals",
        ));
    }
    config
        .sweep
        .validate(FrontEndVariant::default())
        .map_err(|_| ConfigError::ValidationFailed("sweep parameters out of range"))
}

/// Task periods and polling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Acquisition period, measured start to start.
    pub sweep_period_ms: u64,
    pub heartbeat_period_ms: u64,
    pub heartbeat_blink_ms: u64,
    /// Minimum spacing between advertising restarts.
    pub advertise_interval_ms: u64,
    /// Command poll while a wireless client is connected.
    pub command_poll_ms: u64,
    /// Link state poll while idle.
    pub link_poll_ms: u64,
    pub serial_poll_ms: u64,
    /// Delay between store pending-counter checks.
    pub store_poll_ms: u64,
    /// Checks before a non-draining store is declared stalled.
    pub store_stall_polls: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sweep_period_ms: 600_000, // 10 min
            heartbeat_period_ms: 5_000,
            heartbeat_blink_ms: 100,
            advertise_interval_ms: 60_000,
            command_poll_ms: 200,
            link_poll_ms: 1_000,
            serial_poll_ms: 100,
            store_poll_ms: 20,
            store_stall_polls: 500, // 10 s at 20 ms
        }
    }
}
