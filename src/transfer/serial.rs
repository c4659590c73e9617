//! Serial command protocol.
//!
//! | Byte | Action                                   | Reply                         |
//! |------|------------------------------------------|-------------------------------|
//! | 1    | config summary, rewind download cursor   | 15-byte summary               |
//! | 2    | acquire and persist                      | `2` saved / `1` failed        |
//! | 3    | acquire and stream, no persist           | points + terminator           |
//! | 4    | stream dataset at the descending cursor  | points + terminator           |
//! | 5    | delete every dataset                     | `5` done / `6` failed         |
//!
//! Points are 8 bytes (`freq u32`, `real i16`, `imag i16`, little-endian)
//! and a stream always ends with one all-zero point.

use embedded_hal::i2c::I2c;
use log::{debug, warn};

use super::transport::Transport;
use crate::app::commands::SerialCommand;
use crate::app::ports::{EventSink, FlashPort};
use crate::app::service::Node;
use crate::config::Config;
use crate::error::NodeError;
use crate::sweep::{Point, SweepDataset};

pub const STATUS_SAVE_FAILED: u8 = 1;
pub const STATUS_SAVED: u8 = 2;
pub const STATUS_DELETED: u8 = 5;
pub const STATUS_DELETE_FAILED: u8 = 6;

pub const SUMMARY_LEN: usize = 15;
pub const POINT_LEN: usize = 8;
pub const TERMINATOR: [u8; POINT_LEN] = [0; POINT_LEN];

/// `num_sweeps`, `num_sent`, `num_deleted` (u32 LE each), then the id.
pub fn encode_config_summary(config: &Config) -> [u8; SUMMARY_LEN] {
    let mut out = [0u8; SUMMARY_LEN];
    out[0..4].copy_from_slice(&config.num_sweeps.to_le_bytes());
    out[4..8].copy_from_slice(&config.num_sent.to_le_bytes());
    out[8..12].copy_from_slice(&config.num_deleted.to_le_bytes());
    out[12..15].copy_from_slice(&config.device_id);
    out
}

pub fn encode_point(point: &Point) -> [u8; POINT_LEN] {
    let mut out = [0u8; POINT_LEN];
    out[0..4].copy_from_slice(&point.freq.to_le_bytes());
    out[4..6].copy_from_slice(&point.real.to_le_bytes());
    out[6..8].copy_from_slice(&point.imag.to_le_bytes());
    out
}

/// Every point followed by the terminator.
pub fn encode_dataset(dataset: &SweepDataset) -> Vec<u8> {
    let mut out = Vec::with_capacity((dataset.len() + 1) * POINT_LEN);
    for p in dataset.points() {
        out.extend_from_slice(&encode_point(&p));
    }
    out.extend_from_slice(&TERMINATOR);
    out
}

pub fn write_dataset<T: Transport>(transport: &mut T, dataset: &SweepDataset) -> Result<bool, T::Error> {
    let ok = transport.write_all(&encode_dataset(dataset))?;
    transport.flush()?;
    Ok(ok)
}

/// Per-connection serial state: the download cursor.
#[derive(Debug, Default)]
pub struct SerialSession {
    cursor: u32,
}

impl SerialSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Execute one command against the node. Transport failures are
    /// logged and swallowed; only node errors propagate.
    pub async fn handle<I, F, T, S>(
        &mut self,
        command: SerialCommand,
        node: &mut Node<I, F>,
        transport: &mut T,
        now_secs: u32,
        sink: &mut S,
    ) -> Result<(), NodeError>
    where
        I: I2c,
        F: FlashPort,
        T: Transport,
        S: EventSink,
    {
        debug!("Serial: {:?}", command);
        match command {
            SerialCommand::Summary => {
                let config = node.config();
                self.cursor = config.num_sweeps;
                reply(transport, &encode_config_summary(config));
                Ok(())
            }
            SerialCommand::AcquireAndSave => {
                let result = node.acquire_and_persist(now_secs, sink).await;
                let status = if result.is_ok() {
                    STATUS_SAVED
                } else {
                    STATUS_SAVE_FAILED
                };
                reply(transport, &[status]);
                fatal_only(result.map(|_| ()))
            }
            SerialCommand::AcquireAndStream => match node.acquire(now_secs).await {
                Ok(dataset) => {
                    stream(transport, &dataset);
                    Ok(())
                }
                Err(e) => {
                    reply(transport, &TERMINATOR);
                    fatal_only(Err(e))
                }
            },
            SerialCommand::DownloadNext => {
                let stored = node.config().num_sweeps;
                if stored == 0 {
                    reply(transport, &TERMINATOR);
                    return Ok(());
                }
                if self.cursor == 0 || self.cursor > stored {
                    self.cursor = stored;
                }
                let loaded = node.load_dataset(self.cursor).await;
                self.cursor -= 1;
                match loaded {
                    Ok(Some(dataset)) => {
                        stream(transport, &dataset);
                        Ok(())
                    }
                    Ok(None) => {
                        warn!("Serial: dataset {} missing", self.cursor + 1);
                        reply(transport, &TERMINATOR);
                        Ok(())
                    }
                    Err(e) => {
                        reply(transport, &TERMINATOR);
                        fatal_only(Err(e))
                    }
                }
            }
            SerialCommand::DeleteAll => {
                let result = node.delete_all(sink).await;
                let status = if result.is_ok() {
                    STATUS_DELETED
                } else {
                    STATUS_DELETE_FAILED
                };
                self.cursor = 0;
                reply(transport, &[status]);
                fatal_only(result.map(|_| ()))
            }
        }
    }
}

/// Non-fatal failures were already reported on the wire.
fn fatal_only(result: Result<(), NodeError>) -> Result<(), NodeError> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Serial: command failed: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn reply<T: Transport>(transport: &mut T, bytes: &[u8]) {
    match transport.write_all(bytes).and_then(|ok| transport.flush().map(|()| ok)) {
        Ok(true) => {}
        Ok(false) => warn!("Serial: reply truncated"),
        Err(e) => warn!("Serial: write failed: {:?}", e),
    }
}

fn stream<T: Transport>(transport: &mut T, dataset: &SweepDataset) {
    match write_dataset(transport, dataset) {
        Ok(true) => debug!("Serial: streamed {} points", dataset.len()),
        Ok(false) => warn!("Serial: stream truncated"),
        Err(e) => warn!("Serial: stream failed: {:?}", e),
    }
}
