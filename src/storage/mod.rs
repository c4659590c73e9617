//! Persistent record store.
//!
//! ```text
//!   caller ──enqueue──▶ op queue (depth 4) ──pump──▶ FlashPort::execute
//!     ▲                                                   │
//!     └──── pending counter ◀──drain── completion queue ◀─┘
//! ```
//!
//! Records are keyed by `(file id, record key)`. Mutations are queued and
//! complete later; the pending-operation counter is the only way to know
//! the store is quiescent. [`RecordStore::wait_idle`] pumps the queue and
//! sleeps until the counter reaches zero.
//!
//! Layout:
//!
//! | File id          | Keys                                  |
//! |------------------|---------------------------------------|
//! | `0x0FFF`         | `0x0001` config (postcard)            |
//! | sweep id `1..=N` | `0x0010` freq, `0x0011` real,         |
//! |                  | `0x0012` imag, `0x0013` metadata      |

mod datasets;
mod store;

pub use datasets::{
    CONFIG_FILE, CONFIG_KEY, FREQ_KEY, IMAG_KEY, META_KEY, REAL_KEY, sweep_file,
};
pub use store::{QUEUE_DEPTH, RECORD_HEADER_WORDS, RecordStore, WORD_BYTES};

pub type FileId = u16;
pub type RecordKey = u16;

/// Opaque handle to one live record, returned by find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDesc {
    file: FileId,
    key: RecordKey,
    record_id: u32,
}

impl RecordDesc {
    /// Backends mint descriptors; `record_id` is theirs to interpret.
    pub const fn new(file: FileId, key: RecordKey, record_id: u32) -> Self {
        Self {
            file,
            key,
            record_id,
        }
    }

    pub const fn file(&self) -> FileId {
        self.file
    }

    pub const fn key(&self) -> RecordKey {
        self.key
    }

    pub const fn record_id(&self) -> u32 {
        self.record_id
    }
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOp {
    /// `data` is already padded to whole words.
    Write {
        file: FileId,
        key: RecordKey,
        data: Vec<u8>,
    },
    Update {
        desc: RecordDesc,
        data: Vec<u8>,
    },
    DeleteRecord {
        desc: RecordDesc,
    },
    DeleteFile {
        file: FileId,
    },
    Reclaim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Write,
    Update,
    DeleteRecord,
    DeleteFile,
    Reclaim,
}

impl FlashOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Write { .. } => OpKind::Write,
            Self::Update { .. } => OpKind::Update,
            Self::DeleteRecord { .. } => OpKind::DeleteRecord,
            Self::DeleteFile { .. } => OpKind::DeleteFile,
            Self::Reclaim => OpKind::Reclaim,
        }
    }

    /// Flash words the operation will consume, header included.
    pub fn words(&self) -> u32 {
        match self {
            Self::Write { data, .. } | Self::Update { data, .. } => {
                data.len().div_ceil(WORD_BYTES) as u32 + RECORD_HEADER_WORDS
            }
            Self::DeleteRecord { .. } | Self::DeleteFile { .. } | Self::Reclaim => 0,
        }
    }
}

/// Result of one executed operation, drained by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub kind: OpKind,
    pub result: Result<(), crate::app::ports::FlashError>,
}

/// Zero-pad `data` to whole words.
pub fn pad_to_words(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len().div_ceil(WORD_BYTES) * WORD_BYTES);
    out.extend_from_slice(data);
    out.resize(data.len().div_ceil(WORD_BYTES) * WORD_BYTES, 0);
    out
}
