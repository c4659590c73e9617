//! Mock hardware for integration tests.
//!
//! `MockAd5933` models the front end's register file closely enough for
//! the sweep engine to run unmodified; `MockFlash` is a log-structured
//! record backend with configurable latency and fault injection. Both
//! record every command/operation so tests can assert on the history.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};

use impedance_node::app::events::AppEvent;
use impedance_node::app::ports::{ClockPort, EventSink, FlashError, FlashPort, IndicatorPort};
use impedance_node::app::service::Node;
use impedance_node::storage::{
    FileId, FlashOp, OpKind, RECORD_HEADER_WORDS, RecordDesc, RecordKey, RecordStore, WORD_BYTES,
};
use impedance_node::sweep::ad5933::{BLOCK_READ, Command, FrontEndVariant, SET_POINTER, reg, status};
use impedance_node::sweep::SweepEngine;

pub type TestNode = Node<MockAd5933, MockFlash>;

/// 24 °C in the front end's 14-bit format.
pub const TEMP_RAW_24C: u16 = 24 * 32;

// ── MockAd5933 ────────────────────────────────────────────────

/// Register-level front-end model.
///
/// Sample values are `real = 1000 * sweep + index`, `imag = -index`, where
/// `sweep` counts start-sweep commands from 1.
pub struct MockAd5933 {
    regs: [u8; 256],
    pointer: u8,
    pub block_len: usize,
    /// High nibble of every CONTROL_HIGH write.
    pub commands: Vec<u8>,
    /// Status reads that report "not ready" after each measurement command.
    pub busy_polls: u32,
    busy_left: u32,
    /// Status never reports ready.
    pub never_ready: bool,
    /// Fail every transaction once this many have run.
    pub fail_after: Option<usize>,
    pub transactions: usize,
    pub temperature_raw: u16,
    sweeps: u32,
    point: u32,
}

#[allow(dead_code)]
impl MockAd5933 {
    pub fn new() -> Self {
        Self {
            regs: [0; 256],
            pointer: 0,
            block_len: 0,
            commands: Vec::new(),
            busy_polls: 0,
            busy_left: 0,
            never_ready: false,
            fail_after: None,
            transactions: 0,
            temperature_raw: TEMP_RAW_24C,
            sweeps: 0,
            point: 0,
        }
    }

    pub fn count(&self, command: Command) -> usize {
        self.commands.iter().filter(|&&c| c == command as u8).count()
    }

    pub fn sweeps(&self) -> u32 {
        self.sweeps
    }

    pub fn sample(sweep: u32, index: u32) -> (i16, i16) {
        ((sweep * 1_000 + index) as i16, -(index as i16))
    }

    fn latch_point(&mut self) {
        let (re, im) = Self::sample(self.sweeps, self.point);
        let base = reg::REAL_DATA as usize;
        self.regs[base..base + 2].copy_from_slice(&re.to_be_bytes());
        self.regs[base + 2..base + 4].copy_from_slice(&im.to_be_bytes());
        self.regs[reg::STATUS as usize] = status::DATA_VALID;
        self.busy_left = self.busy_polls;
    }

    fn control(&mut self, high: u8) {
        let command = high >> 4;
        self.commands.push(command);
        match command {
            c if c == Command::MeasureTemp as u8 => {
                let base = reg::TEMP_DATA as usize;
                self.regs[base..base + 2].copy_from_slice(&self.temperature_raw.to_be_bytes());
                self.regs[reg::STATUS as usize] = status::TEMP_VALID;
                self.busy_left = self.busy_polls;
            }
            c if c == Command::InitStartFreq as u8 => {
                self.point = 0;
                self.regs[reg::STATUS as usize] = 0;
            }
            c if c == Command::StartSweep as u8 => {
                self.sweeps += 1;
                self.latch_point();
            }
            c if c == Command::IncrementFreq as u8 => {
                self.point += 1;
                self.latch_point();
            }
            c if c == Command::RepeatFreq as u8 => self.latch_point(),
            _ => self.regs[reg::STATUS as usize] = 0,
        }
    }

    fn read_status(&mut self) -> u8 {
        if self.never_ready {
            return 0;
        }
        if self.busy_left > 0 {
            self.busy_left -= 1;
            return 0;
        }
        self.regs[reg::STATUS as usize]
    }
}

impl Default for MockAd5933 {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for MockAd5933 {
    type Error = ErrorKind;
}

impl I2c for MockAd5933 {
    fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), ErrorKind> {
        self.transactions += 1;
        if self.fail_after.is_some_and(|n| self.transactions > n) {
            return Err(ErrorKind::Other);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => match &bytes[..] {
                    [SET_POINTER, r] => self.pointer = *r,
                    [BLOCK_READ, n] => self.block_len = *n as usize,
                    [r, value] => {
                        self.regs[*r as usize] = *value;
                        if *r == reg::CONTROL_HIGH {
                            self.control(*value);
                        }
                    }
                    _ => return Err(ErrorKind::Other),
                },
                Operation::Read(buf) => {
                    if self.pointer == reg::STATUS && buf.len() == 1 {
                        buf[0] = self.read_status();
                    } else {
                        let base = self.pointer as usize;
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = self.regs[base + i];
                        }
                    }
                    self.block_len = 0;
                }
            }
        }
        Ok(())
    }
}

// ── MockFlash ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Record {
    file: FileId,
    key: RecordKey,
    record_id: u32,
    data: Vec<u8>,
    live: bool,
}

impl Record {
    fn words(&self) -> u32 {
        self.data.len().div_ceil(WORD_BYTES) as u32 + RECORD_HEADER_WORDS
    }
}

/// Log-structured record backend. Deleted records keep their space until
/// a reclaim.
#[derive(Debug, Clone)]
pub struct MockFlash {
    log: Vec<Record>,
    next_id: u32,
    pub capacity_words: u32,
    /// `is_busy` reports true this many times after each executed op.
    pub busy_checks: u32,
    busy_left: Cell<u32>,
    /// Fail the n-th (1-based) operation of a kind with an I/O error.
    pub fail_on: Option<(OpKind, usize)>,
    /// Every executed operation, in order.
    pub ops: Vec<OpKind>,
    /// Targets of executed file deletions, in order.
    pub deleted_files: Vec<FileId>,
    initialized: bool,
}

#[allow(dead_code)]
impl MockFlash {
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    pub fn with_capacity(capacity_words: u32) -> Self {
        Self {
            log: Vec::new(),
            next_id: 1,
            capacity_words,
            busy_checks: 0,
            busy_left: Cell::new(0),
            fail_on: None,
            ops: Vec::new(),
            deleted_files: Vec::new(),
            initialized: false,
        }
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.ops.iter().filter(|&&k| k == kind).count()
    }

    pub fn live_records(&self, file: FileId) -> usize {
        self.log.iter().filter(|r| r.live && r.file == file).count()
    }

    pub fn used_words(&self) -> u32 {
        self.log.iter().map(Record::words).sum()
    }

    /// Place a record directly, bypassing the queue.
    pub fn inject(&mut self, file: FileId, key: RecordKey, data: &[u8]) {
        self.append(file, key, data.to_vec());
    }

    fn append(&mut self, file: FileId, key: RecordKey, data: Vec<u8>) {
        for r in self.log.iter_mut().filter(|r| r.file == file && r.key == key) {
            r.live = false;
        }
        self.log.push(Record {
            file,
            key,
            record_id: self.next_id,
            data,
            live: true,
        });
        self.next_id += 1;
    }

    fn live(&self, record_id: u32) -> Option<&Record> {
        self.log.iter().find(|r| r.live && r.record_id == record_id)
    }

    fn kill(&mut self, desc: &RecordDesc) -> Result<(), FlashError> {
        let r = self
            .log
            .iter_mut()
            .find(|r| r.live && r.record_id == desc.record_id())
            .ok_or(FlashError::NotFound)?;
        r.live = false;
        Ok(())
    }

    fn fits(&self, data: &[u8]) -> bool {
        self.used_words() + data.len().div_ceil(WORD_BYTES) as u32 + RECORD_HEADER_WORDS
            <= self.capacity_words
    }
}

impl Default for MockFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashPort for MockFlash {
    fn init(&mut self) -> Result<(), FlashError> {
        self.initialized = true;
        Ok(())
    }

    fn find(&self, file: FileId, key: RecordKey) -> Result<Option<RecordDesc>, FlashError> {
        if !self.initialized {
            return Err(FlashError::NotInitialized);
        }
        Ok(self
            .log
            .iter()
            .rev()
            .find(|r| r.live && r.file == file && r.key == key)
            .map(|r| RecordDesc::new(file, key, r.record_id)))
    }

    fn record_len(&self, desc: &RecordDesc) -> Result<usize, FlashError> {
        self.live(desc.record_id())
            .map(|r| r.data.len())
            .ok_or(FlashError::NotFound)
    }

    fn read(&self, desc: &RecordDesc, buf: &mut [u8]) -> Result<usize, FlashError> {
        let r = self.live(desc.record_id()).ok_or(FlashError::NotFound)?;
        let n = r.data.len().min(buf.len());
        buf[..n].copy_from_slice(&r.data[..n]);
        Ok(n)
    }

    fn free_words(&self) -> u32 {
        self.capacity_words.saturating_sub(self.used_words())
    }

    fn is_busy(&self) -> bool {
        let left = self.busy_left.get();
        if left > 0 {
            self.busy_left.set(left - 1);
            return true;
        }
        false
    }

    fn execute(&mut self, op: &FlashOp) -> Result<(), FlashError> {
        if !self.initialized {
            return Err(FlashError::NotInitialized);
        }
        self.busy_left.set(self.busy_checks);
        let kind = op.kind();
        self.ops.push(kind);
        if let Some((fail_kind, nth)) = self.fail_on {
            if fail_kind == kind && self.count(kind) == nth {
                return Err(FlashError::Io(-5));
            }
        }
        match op {
            FlashOp::Write { file, key, data } => {
                if !self.fits(data) {
                    return Err(FlashError::NoSpace);
                }
                self.append(*file, *key, data.clone());
                Ok(())
            }
            FlashOp::Update { desc, data } => {
                if !self.fits(data) {
                    return Err(FlashError::NoSpace);
                }
                self.kill(desc)?;
                self.append(desc.file(), desc.key(), data.clone());
                Ok(())
            }
            FlashOp::DeleteRecord { desc } => self.kill(desc),
            FlashOp::DeleteFile { file } => {
                self.deleted_files.push(*file);
                for r in self.log.iter_mut().filter(|r| r.file == *file) {
                    r.live = false;
                }
                Ok(())
            }
            FlashOp::Reclaim => {
                self.log.retain(|r| r.live);
                Ok(())
            }
        }
    }
}

// ── Clock / indicator / events ────────────────────────────────

#[derive(Debug, Default)]
pub struct MockClock {
    now_ms: Cell<u64>,
}

#[allow(dead_code)]
impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl ClockPort for MockClock {
    fn uptime_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

#[derive(Debug, Default)]
pub struct RecordingIndicator {
    pub busy: RefCell<Vec<bool>>,
    pub heartbeat: RefCell<Vec<bool>>,
    pub fatal: Cell<bool>,
}

impl IndicatorPort for RecordingIndicator {
    fn set_busy(&self, on: bool) {
        self.busy.borrow_mut().push(on);
    }

    fn set_heartbeat(&self, on: bool) {
        self.heartbeat.borrow_mut().push(on);
    }

    fn set_fatal(&self) {
        self.fatal.set(true);
    }
}

/// Clones share one event log, so a sink moved into a task can still be
/// inspected afterwards.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<AppEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.borrow().clone()
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.borrow().contains(event)
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

// ── Builders ──────────────────────────────────────────────────

pub fn store(flash: MockFlash) -> RecordStore<MockFlash> {
    RecordStore::new(flash).with_polling(0, 1_000)
}

pub fn node_with(flash: MockFlash) -> TestNode {
    Node::new(
        SweepEngine::new(MockAd5933::new(), FrontEndVariant::Ad5933).with_poll_interval(0),
        store(flash),
    )
}

/// A node started on blank flash with device id `AZM`.
#[allow(dead_code)]
pub fn started_node() -> TestNode {
    let mut node = node_with(MockFlash::new());
    futures_lite::future::block_on(node.start([0, 255, 128], &mut RecordingSink::new()))
        .expect("start");
    node
}

/// A started node holding `n` datasets.
#[allow(dead_code)]
pub fn node_with_datasets(n: u32) -> TestNode {
    let mut node = started_node();
    let mut sink = RecordingSink::new();
    for i in 1..=n {
        let id = futures_lite::future::block_on(node.acquire_and_persist(i * 60, &mut sink))
            .expect("acquire");
        assert_eq!(id, i);
    }
    node
}
