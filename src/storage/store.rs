//! Queue, completion accounting and quiescence waiting.

use core::time::Duration;

use async_io_mini::Timer;
use heapless::Deque;
use log::{debug, error, warn};

use super::{Completion, FileId, FlashOp, RecordDesc, RecordKey, pad_to_words};
use crate::app::ports::{FlashError, FlashPort};
use crate::config::TimingConfig;
use crate::error::StoreError;

/// Maximum operations outstanding at once.
pub const QUEUE_DEPTH: usize = 4;
/// Native word size of the backing flash.
pub const WORD_BYTES: usize = 4;
/// Per-record bookkeeping overhead in words.
pub const RECORD_HEADER_WORDS: u32 = 3;

pub struct RecordStore<F> {
    backend: F,
    queue: Deque<FlashOp, QUEUE_DEPTH>,
    completions: Deque<Completion, QUEUE_DEPTH>,
    /// Enqueued but not yet drained. Never exceeds `QUEUE_DEPTH`.
    pending: usize,
    peak_pending: usize,
    /// Words promised to queued writes that the backend has not consumed.
    reserved_words: u32,
    no_space: bool,
    fatal: Option<StoreError>,
    initialized: bool,
    poll_interval: Duration,
    stall_polls: u32,
}

impl<F: FlashPort> RecordStore<F> {
    pub fn new(backend: F) -> Self {
        let timing = TimingConfig::default();
        Self {
            backend,
            queue: Deque::new(),
            completions: Deque::new(),
            pending: 0,
            peak_pending: 0,
            reserved_words: 0,
            no_space: false,
            fatal: None,
            initialized: false,
            poll_interval: Duration::from_millis(timing.store_poll_ms),
            stall_polls: timing.store_stall_polls,
        }
    }

    /// Override the quiescence polling cadence.
    pub fn with_polling(mut self, interval_ms: u64, stall_polls: u32) -> Self {
        self.poll_interval = Duration::from_millis(interval_ms);
        self.stall_polls = stall_polls.max(1);
        self
    }

    pub fn init(&mut self) -> Result<(), StoreError> {
        self.backend.init().map_err(|e| {
            error!("Store: init failed: {}", e);
            StoreError::Fatal(e)
        })?;
        self.initialized = true;
        debug!("Store: ready, {} words free", self.backend.free_words());
        Ok(())
    }

    pub fn backend(&self) -> &F {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut F {
        &mut self.backend
    }

    // ── Accounting ────────────────────────────────────────────

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Highest pending count observed since construction.
    pub fn peak_pending(&self) -> usize {
        self.peak_pending
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }

    pub fn fatal(&self) -> Option<StoreError> {
        self.fatal
    }

    /// Returns and clears the "a completion reported no space" latch.
    pub fn take_no_space(&mut self) -> bool {
        core::mem::take(&mut self.no_space)
    }

    // ── Reads ─────────────────────────────────────────────────

    /// `Ok(None)` is the normal not-found outcome.
    pub fn find(&self, file: FileId, key: RecordKey) -> Result<Option<RecordDesc>, StoreError> {
        self.usable()?;
        match self.backend.find(file, key) {
            Ok(found) => Ok(found),
            Err(FlashError::NotFound) => Ok(None),
            Err(e) => Err(StoreError::Fatal(e)),
        }
    }

    /// Copy a record into `buf`, which must hold the whole padded record.
    pub fn read(&self, desc: &RecordDesc, buf: &mut [u8]) -> Result<usize, StoreError> {
        self.usable()?;
        self.backend.read(desc, buf).map_err(StoreError::Fatal)
    }

    /// Read a record that must hold at least `expected` bytes.
    pub fn read_exact(&self, desc: &RecordDesc, expected: usize) -> Result<Vec<u8>, StoreError> {
        self.usable()?;
        let len = self.backend.record_len(desc).map_err(StoreError::Fatal)?;
        if len < expected {
            return Err(StoreError::Corrupt("record shorter than expected"));
        }
        let mut buf = vec![0u8; len];
        let n = self.read(desc, &mut buf)?;
        if n < expected {
            return Err(StoreError::Corrupt("short read"));
        }
        buf.truncate(expected);
        Ok(buf)
    }

    // ── Mutations (enqueue only) ──────────────────────────────

    pub fn write(&mut self, file: FileId, key: RecordKey, data: &[u8]) -> Result<(), StoreError> {
        self.enqueue(FlashOp::Write {
            file,
            key,
            data: pad_to_words(data),
        })
    }

    pub fn update(&mut self, desc: &RecordDesc, data: &[u8]) -> Result<(), StoreError> {
        self.enqueue(FlashOp::Update {
            desc: *desc,
            data: pad_to_words(data),
        })
    }

    pub fn delete_record(&mut self, desc: &RecordDesc) -> Result<(), StoreError> {
        self.enqueue(FlashOp::DeleteRecord { desc: *desc })
    }

    pub fn delete_file(&mut self, file: FileId) -> Result<(), StoreError> {
        self.enqueue(FlashOp::DeleteFile { file })
    }

    pub fn reclaim(&mut self) -> Result<(), StoreError> {
        self.enqueue(FlashOp::Reclaim)
    }

    /// Enqueue, first draining the store if the queue is full.
    pub async fn submit(&mut self, op: FlashOp) -> Result<(), StoreError> {
        if self.pending >= QUEUE_DEPTH {
            self.wait_idle().await?;
        }
        self.enqueue(op)
    }

    fn enqueue(&mut self, op: FlashOp) -> Result<(), StoreError> {
        self.usable()?;
        if self.pending >= QUEUE_DEPTH {
            warn!("Store: queue full ({} pending)", self.pending);
            return Err(StoreError::QueueFull);
        }
        let words = op.words();
        if words > 0 && self.reserved_words + words > self.backend.free_words() {
            warn!(
                "Store: no space for {} words ({} free, {} reserved)",
                words,
                self.backend.free_words(),
                self.reserved_words
            );
            return Err(StoreError::NoSpace);
        }
        let kind = op.kind();
        self.queue.push_back(op).map_err(|_| StoreError::QueueFull)?;
        self.pending += 1;
        self.peak_pending = self.peak_pending.max(self.pending);
        self.reserved_words += words;
        debug!("Store: queued {:?}, {} pending", kind, self.pending);
        Ok(())
    }

    // ── Completion ────────────────────────────────────────────

    /// Execute whatever the backend will accept, then drain completions.
    /// Returns the number of operations completed.
    pub fn pump(&mut self) -> usize {
        while !self.backend.is_busy() {
            let Some(op) = self.queue.pop_front() else {
                break;
            };
            let result = self.backend.execute(&op);
            self.reserved_words = self.reserved_words.saturating_sub(op.words());
            let completion = Completion {
                kind: op.kind(),
                result,
            };
            if self.completions.push_back(completion).is_err() {
                error!("Store: completion queue overflow");
                self.fatal = Some(StoreError::QueueFull);
            }
        }
        self.drain_completions()
    }

    fn drain_completions(&mut self) -> usize {
        let mut drained = 0;
        while let Some(done) = self.completions.pop_front() {
            drained += 1;
            if self.pending == 0 {
                error!("Store: completion with nothing pending");
            } else {
                self.pending -= 1;
            }
            match done.result {
                Ok(()) => {}
                Err(FlashError::NoSpace) => {
                    warn!("Store: {:?} failed, no space", done.kind);
                    self.no_space = true;
                }
                Err(FlashError::NotFound) => {
                    debug!("Store: {:?} found nothing to act on", done.kind);
                }
                Err(e) => {
                    error!("Store: {:?} failed: {}", done.kind, e);
                    self.fatal = Some(StoreError::Fatal(e));
                }
            }
        }
        drained
    }

    /// Suspend until every enqueued operation has completed.
    pub async fn wait_idle(&mut self) -> Result<(), StoreError> {
        let mut polls = 0u32;
        loop {
            self.pump();
            if let Some(e) = self.fatal {
                return Err(e);
            }
            if self.pending == 0 {
                return Ok(());
            }
            polls += 1;
            if polls >= self.stall_polls {
                error!("Store: {} operations stuck pending", self.pending);
                self.fatal = Some(StoreError::Stalled);
                return Err(StoreError::Stalled);
            }
            Timer::after(self.poll_interval).await;
        }
    }

    fn usable(&self) -> Result<(), StoreError> {
        if let Some(e) = self.fatal {
            return Err(e);
        }
        if !self.initialized {
            return Err(StoreError::Fatal(FlashError::NotInitialized));
        }
        Ok(())
    }
}
