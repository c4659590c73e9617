//! Outbound application events.
//!
//! The coordinator and the task loops emit these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other
//! side decide what to do with them (serial log, tests record them).

use crate::error::{NodeError, SweepError};

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Startup finished; carries the restored counters.
    Started {
        device_id: [u8; 3],
        num_sweeps: u32,
        num_sent: u32,
    },

    /// A fresh device id was generated on first boot.
    Provisioned([u8; 3]),

    /// An acquisition was persisted under `id`.
    SweepSaved { id: u32, num_points: u32 },

    /// An acquisition failed; the cycle is skipped.
    SweepFailed(SweepError),

    /// The store is full; no new datasets until a delete-all.
    StorageFull,

    /// Deleted space was compacted.
    Reclaimed { num_deleted: u32 },

    /// Bulk deletion finished.
    DeletedAll { deleted: u32 },

    /// A dataset was fully streamed over the wireless link.
    TransferComplete { id: u32 },

    /// The link dropped mid-transfer; retried on the next connection.
    TransferAborted { id: u32, cursor: u32 },

    /// Unrecoverable failure; the node halts.
    Fatal(NodeError),
}
