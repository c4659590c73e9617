//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing application events to the ESP-IDF
//! logger (UART / USB-CDC in production).

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the console.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started {
                device_id,
                num_sweeps,
                num_sent,
            } => {
                info!(
                    "START | id={} | stored={} sent={}",
                    core::str::from_utf8(device_id).unwrap_or("???"),
                    num_sweeps,
                    num_sent
                );
            }
            AppEvent::Provisioned(id) => {
                info!(
                    "START | provisioned id={}",
                    core::str::from_utf8(id).unwrap_or("???")
                );
            }
            AppEvent::SweepSaved { id, num_points } => {
                info!("SWEEP | saved #{} ({} points)", id, num_points);
            }
            AppEvent::SweepFailed(e) => {
                warn!("SWEEP | failed: {}", e);
            }
            AppEvent::StorageFull => {
                warn!("STORE | full, acquisitions paused");
            }
            AppEvent::Reclaimed { num_deleted } => {
                info!("STORE | reclaimed after {} deletions", num_deleted);
            }
            AppEvent::DeletedAll { deleted } => {
                info!("STORE | deleted {} datasets", deleted);
            }
            AppEvent::TransferComplete { id } => {
                info!("LINK  | #{} delivered", id);
            }
            AppEvent::TransferAborted { id, cursor } => {
                warn!("LINK  | #{} aborted at point {}", id, cursor);
            }
            AppEvent::Fatal(e) => {
                error!("FATAL | {}", e);
            }
        }
    }
}
