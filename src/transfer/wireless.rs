//! Wireless chunked transfer.
//!
//! ```text
//!   metadata reply (11 bytes)
//!   ┌──────┬──────────────┬──────────┬────────┐
//!   │ 0x00 │ numPoints u32│ time u32 │ temp i16│   little-endian
//!   └──────┴──────────────┴──────────┴────────┘
//!
//!   chunk (≤ negotiated payload)
//!   ┌───────┬──────────────────────────────────┬─────┐
//!   │ count │ freq u32 │ real i16 │ imag i16    │ ... │   count × 8 bytes
//!   └───────┴──────────────────────────────────┴─────┘
//! ```
//!
//! A point is added while the chunk length plus one more point stays
//! below the negotiated maximum. The cursor lives in [`WirelessTransfer`]
//! and is discarded with the staged dataset when the link drops. During a
//! burst it only moves once the stack has accepted the chunk, so a rejected
//! notification is resent by the next request.

use log::{debug, info};

use crate::app::ports::LinkError;
use crate::sweep::{Metadata, SweepDataset};

pub const METADATA_REPLY_LEN: usize = 11;
pub const POINT_LEN: usize = 8;
/// Chunks sent per chunk-request command.
pub const CHUNKS_PER_BURST: usize = 3;
/// Smallest payload bound that still guarantees progress.
pub const MIN_PAYLOAD: usize = 16;
/// Returned by [`WirelessTransfer::next_chunk`] once the dataset is out.
pub const TRANSFER_COMPLETE: u32 = 0;

/// Payload available inside one notification for an ATT MTU.
pub const fn payload_for_mtu(mtu: usize) -> usize {
    mtu.saturating_sub(3)
}

pub fn encode_metadata(meta: &Metadata) -> [u8; METADATA_REPLY_LEN] {
    let mut out = [0u8; METADATA_REPLY_LEN];
    out[1..].copy_from_slice(&meta.to_bytes());
    out
}

/// Pack points from `cursor` into a fresh buffer no longer than
/// `max_payload`. Returns the buffer; its first byte is the point count.
pub fn pack_chunk(dataset: &SweepDataset, cursor: usize, max_payload: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_payload.max(1));
    out.push(0);
    let mut count = 0usize;
    while out.len() + POINT_LEN < max_payload && count < u8::MAX as usize {
        let Some(p) = dataset.point(cursor + count) else {
            break;
        };
        out.extend_from_slice(&p.freq.to_le_bytes());
        out.extend_from_slice(&p.real.to_le_bytes());
        out.extend_from_slice(&p.imag.to_le_bytes());
        count += 1;
    }
    out[0] = count as u8;
    out
}

/// Dataset currently offered to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Staged {
    id: u32,
    epoch: u32,
    dataset: SweepDataset,
}

/// Result of one chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// Cursor after this chunk, or [`TRANSFER_COMPLETE`].
    pub status: u32,
}

/// What a burst achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstOutcome {
    /// More chunks remain.
    InProgress { cursor: u32 },
    /// The last point went out; carries the staged id and epoch.
    Complete { id: u32, epoch: u32 },
    /// Nothing is staged.
    Idle,
}

#[derive(Debug, Default)]
pub struct WirelessTransfer {
    staged: Option<Staged>,
    cursor: usize,
}

impl WirelessTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer dataset `id`, restarting from cursor 0.
    pub fn stage(&mut self, id: u32, epoch: u32, dataset: SweepDataset) {
        debug!("Link: staged dataset {} ({} points)", id, dataset.len());
        self.staged = Some(Staged { id, epoch, dataset });
        self.cursor = 0;
    }

    /// Drop the staged dataset and cursor. Returns `(id, cursor)` if a
    /// transfer was in flight.
    pub fn discard(&mut self) -> Option<(u32, u32)> {
        let cursor = core::mem::take(&mut self.cursor) as u32;
        self.staged.take().map(|s| (s.id, cursor))
    }

    pub fn staged_id(&self) -> Option<u32> {
        self.staged.as_ref().map(|s| s.id)
    }

    pub fn staged_epoch(&self) -> Option<u32> {
        self.staged.as_ref().map(|s| s.epoch)
    }

    pub fn cursor(&self) -> u32 {
        self.cursor as u32
    }

    pub fn metadata(&self) -> Option<[u8; METADATA_REPLY_LEN]> {
        self.staged.as_ref().map(|s| encode_metadata(&s.dataset.meta))
    }

    /// Pack the chunk at the cursor without moving it.
    pub fn peek_chunk(&self, max_payload: usize) -> Option<Chunk> {
        let staged = self.staged.as_ref()?;
        let bytes = pack_chunk(&staged.dataset, self.cursor, max_payload);
        let next = self.cursor + bytes[0] as usize;
        let status = if next >= staged.dataset.len() {
            TRANSFER_COMPLETE
        } else {
            next as u32
        };
        Some(Chunk { bytes, status })
    }

    /// Pack the chunk at the cursor and advance it.
    pub fn next_chunk(&mut self, max_payload: usize) -> Option<Chunk> {
        let chunk = self.peek_chunk(max_payload)?;
        self.cursor += chunk.bytes[0] as usize;
        Some(chunk)
    }

    /// Send up to [`CHUNKS_PER_BURST`] chunks through `notify`, stopping
    /// early when the dataset is exhausted. A failed notify leaves the
    /// cursor on the rejected chunk.
    pub fn burst<N>(&mut self, max_payload: usize, mut notify: N) -> Result<BurstOutcome, LinkError>
    where
        N: FnMut(&[u8]) -> Result<(), LinkError>,
    {
        if max_payload < MIN_PAYLOAD {
            return Err(LinkError::MtuTooSmall);
        }
        for _ in 0..CHUNKS_PER_BURST {
            let Some(chunk) = self.peek_chunk(max_payload) else {
                return Ok(BurstOutcome::Idle);
            };
            notify(&chunk.bytes)?;
            self.cursor += chunk.bytes[0] as usize;
            if chunk.status == TRANSFER_COMPLETE {
                let (id, epoch) = self
                    .staged
                    .as_ref()
                    .map_or((0, 0), |s| (s.id, s.epoch));
                info!("Link: dataset {} sent", id);
                return Ok(BurstOutcome::Complete { id, epoch });
            }
        }
        Ok(BurstOutcome::InProgress {
            cursor: self.cursor as u32,
        })
    }
}
