//! Task loops — the cooperative tasks of the Task Coordinator.
//!
//! All four run on one `edge_executor::LocalExecutor` driven by
//! `futures_lite::future::block_on`, with `async-io-mini` timers for
//! sleeps. The [`Node`] sits behind an async mutex; a task holds the lock
//! for a whole multi-step sequence (sweep + save, burst + mark-sent,
//! delete-all), so sequences never interleave.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │  LocalExecutor                                               │
//!  │  ┌─────────────┐ ┌─────────────┐ ┌────────────┐ ┌──────────┐ │
//!  │  │ acquisition │ │    link     │ │   serial   │ │heartbeat │ │
//!  │  │ period ⏱    │ │ 200ms/1s ⏱  │ │  100ms ⏱   │ │  5s ⏱    │ │
//!  │  └──────┬──────┘ └──────┬──────┘ └─────┬──────┘ └──────────┘ │
//!  │         └───────────────┼──────────────┘                     │
//!  │                         ▼                                    │
//!  │              Mutex<Node> ── fatal Signal ──▶ main halts      │
//!  └──────────────────────────────────────────────────────────────┘
//! ```

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use async_io_mini::Timer;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_hal::i2c::I2c;
use log::{debug, error, info, warn};

use super::commands::{LinkCommand, SerialCommand};
use super::events::AppEvent;
use super::ports::{ClockPort, EventSink, FlashPort, IndicatorPort, LinkPort};
use super::service::Node;
use crate::config::TimingConfig;
use crate::error::NodeError;
use crate::scheduler::{AdvertiseGate, PeriodicTimer};
use crate::transfer::serial::{STATUS_DELETED, STATUS_DELETE_FAILED};
use crate::transfer::wireless::METADATA_REPLY_LEN;
use crate::transfer::{BurstOutcome, SerialSession, Transport, WirelessTransfer};

// ── Shared state ──────────────────────────────────────────────

/// State every task borrows.
pub struct Shared<I, F> {
    pub node: Mutex<CriticalSectionRawMutex, Node<I, F>>,
    pub timing: TimingConfig,
    fatal: Signal<CriticalSectionRawMutex, NodeError>,
    halted: AtomicBool,
}

impl<I: I2c, F: FlashPort> Shared<I, F> {
    pub fn new(node: Node<I, F>, timing: TimingConfig) -> Self {
        Self {
            node: Mutex::new(node),
            timing,
            fatal: Signal::new(),
            halted: AtomicBool::new(false),
        }
    }

    /// Stop every task and wake whoever waits in [`wait_fatal`](Self::wait_fatal).
    pub fn raise_fatal<S: EventSink>(&self, e: NodeError, sink: &mut S) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        error!("Tasks: fatal {}, halting", e);
        sink.emit(&AppEvent::Fatal(e));
        self.fatal.signal(e);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub async fn wait_fatal(&self) -> NodeError {
        self.fatal.wait().await
    }

    /// Fatal errors halt; anything else is logged and the task carries on.
    fn check<T, S: EventSink>(&self, task: &str, result: Result<T, NodeError>, sink: &mut S) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) if e.is_fatal() => {
                self.raise_fatal(e, sink);
                None
            }
            Err(e) => {
                warn!("Tasks: {} failed: {}", task, e);
                None
            }
        }
    }
}

async fn sleep_ms(ms: u64) {
    Timer::after(Duration::from_millis(ms)).await;
}

// ── Acquisition ───────────────────────────────────────────────

/// One acquisition cycle stamped with `now_secs`. The busy indicator is
/// lit for the duration.
pub async fn run_acquisition<I, F, N, S>(
    shared: &Shared<I, F>,
    indicator: &N,
    now_secs: u32,
    sink: &mut S,
) -> Result<Option<u32>, NodeError>
where
    I: I2c,
    F: FlashPort,
    N: IndicatorPort,
    S: EventSink,
{
    let mut node = shared.node.lock().await;
    indicator.set_busy(true);
    let result = node.acquisition_cycle(now_secs, sink).await;
    indicator.set_busy(false);
    if let Ok(None) = result {
        debug!("Acquisition: storage full, cycle skipped");
    }
    result
}

/// Sweep and save once per period, measured start to start.
pub async fn acquisition_task<I, F, C, N, S>(shared: &Shared<I, F>, clock: &C, indicator: &N, mut sink: S)
where
    I: I2c,
    F: FlashPort,
    C: ClockPort,
    N: IndicatorPort,
    S: EventSink,
{
    let mut timer = PeriodicTimer::new(shared.timing.sweep_period_ms);
    info!("Acquisition: every {}ms", timer.period_ms());
    while !shared.is_halted() {
        let start_ms = timer.begin_cycle(clock.uptime_ms());
        let result = run_acquisition(shared, indicator, (start_ms / 1_000) as u32, &mut sink).await;
        shared.check("acquisition", result, &mut sink);
        if shared.is_halted() {
            break;
        }
        sleep_ms(timer.remaining_ms(clock.uptime_ms())).await;
    }
}

// ── Wireless link ─────────────────────────────────────────────

/// Link task state: the staged transfer, its cursor and advertising
/// pacing. Everything here is dropped or reset on disconnect.
pub struct LinkSession {
    transfer: WirelessTransfer,
    gate: AdvertiseGate,
    was_connected: bool,
}

impl LinkSession {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            transfer: WirelessTransfer::new(),
            gate: AdvertiseGate::new(timing.advertise_interval_ms),
            was_connected: false,
        }
    }

    pub fn transfer(&self) -> &WirelessTransfer {
        &self.transfer
    }

    /// One pass of the link state machine. Returns the delay before the
    /// next pass.
    pub async fn poll<I, F, L, C, S>(
        &mut self,
        shared: &Shared<I, F>,
        link: &mut L,
        clock: &C,
        sink: &mut S,
    ) -> Result<u64, NodeError>
    where
        I: I2c,
        F: FlashPort,
        L: LinkPort,
        C: ClockPort,
        S: EventSink,
    {
        if link.is_connected() {
            self.was_connected = true;
            self.refresh_staging(shared).await?;
            while let Some(byte) = link.take_command() {
                self.handle_command(byte, shared, link, sink).await?;
            }
            return Ok(shared.timing.command_poll_ms);
        }

        if self.was_connected {
            self.was_connected = false;
            match self.transfer.discard() {
                Some((id, cursor)) if cursor > 0 => {
                    sink.emit(&AppEvent::TransferAborted { id, cursor });
                }
                _ => {}
            }
            self.gate.reset();
        }

        let unsent = shared.node.lock().await.next_unsent().is_some();
        let now = clock.uptime_ms();
        if unsent && !link.is_advertising() && self.gate.ready(now) {
            self.gate.mark(now);
            if let Err(e) = link.start_advertising() {
                warn!("Link: advertising failed: {}", e);
            }
        }
        Ok(shared.timing.link_poll_ms)
    }

    /// Keep the oldest unsent dataset staged. A delete-all since staging
    /// invalidates what is held.
    async fn refresh_staging<I: I2c, F: FlashPort>(&mut self, shared: &Shared<I, F>) -> Result<(), NodeError> {
        let mut node = shared.node.lock().await;
        let next = node.next_unsent();
        if self.transfer.staged_id().is_some()
            && (self.transfer.staged_epoch() != Some(node.epoch()) || self.transfer.staged_id() != next)
        {
            debug!("Link: staged dataset is stale, dropping");
            self.transfer.discard();
        }
        if self.transfer.staged_id().is_some() {
            return Ok(());
        }
        let Some(id) = next else {
            return Ok(());
        };
        match node.load_dataset(id).await {
            Ok(Some(dataset)) => {
                let epoch = node.epoch();
                self.transfer.stage(id, epoch, dataset);
                Ok(())
            }
            Ok(None) => {
                warn!("Link: dataset {} missing, skipping it", id);
                let epoch = node.epoch();
                node.mark_sent(id, epoch).await.map(|_| ())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Link: dataset {} unreadable ({}), skipping it", id, e);
                let epoch = node.epoch();
                node.mark_sent(id, epoch).await.map(|_| ())
            }
        }
    }

    async fn handle_command<I, F, L, S>(
        &mut self,
        byte: u8,
        shared: &Shared<I, F>,
        link: &mut L,
        sink: &mut S,
    ) -> Result<(), NodeError>
    where
        I: I2c,
        F: FlashPort,
        L: LinkPort,
        S: EventSink,
    {
        let Ok(command) = LinkCommand::try_from(byte) else {
            warn!("Link: unknown command {:#04x}", byte);
            return Ok(());
        };
        debug!("Link: {:?}", command);
        match command {
            LinkCommand::Metadata => {
                let reply = self.transfer.metadata().unwrap_or([0; METADATA_REPLY_LEN]);
                if let Err(e) = link.notify(&reply) {
                    warn!("Link: metadata reply failed: {}", e);
                }
            }
            LinkCommand::NextChunks => {
                let max = link.max_payload();
                match self.transfer.burst(max, |bytes| link.notify(bytes)) {
                    Ok(BurstOutcome::Complete { id, epoch }) => {
                        self.transfer.discard();
                        let accepted = shared.node.lock().await.mark_sent(id, epoch).await?;
                        if accepted {
                            sink.emit(&AppEvent::TransferComplete { id });
                        }
                        self.refresh_staging(shared).await?;
                    }
                    Ok(BurstOutcome::InProgress { cursor }) => {
                        debug!("Link: burst sent, cursor {}", cursor);
                    }
                    Ok(BurstOutcome::Idle) => {
                        // Nothing staged: an empty chunk tells the peer there is no data.
                        if let Err(e) = link.notify(&[0]) {
                            warn!("Link: empty chunk failed: {}", e);
                        }
                    }
                    Err(e) => warn!(
                        "Link: burst stopped at cursor {}: {}",
                        self.transfer.cursor(),
                        e
                    ),
                }
            }
            LinkCommand::DeleteAll => {
                self.transfer.discard();
                let result = shared.node.lock().await.delete_all(sink).await;
                let status = if result.is_ok() {
                    STATUS_DELETED
                } else {
                    STATUS_DELETE_FAILED
                };
                if let Err(e) = link.notify(&[status]) {
                    warn!("Link: delete status failed: {}", e);
                }
                match result {
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!("Link: delete-all failed: {}", e),
                    Ok(_) => {}
                }
            }
        }
        Ok(())
    }
}

/// Serve the wireless peer while connected; advertise while idle with
/// unsent data.
pub async fn link_task<I, F, L, C, S>(shared: &Shared<I, F>, mut link: L, clock: &C, mut sink: S)
where
    I: I2c,
    F: FlashPort,
    L: LinkPort,
    C: ClockPort,
    S: EventSink,
{
    let mut session = LinkSession::new(&shared.timing);
    while !shared.is_halted() {
        let result = session.poll(shared, &mut link, clock, &mut sink).await;
        let delay = shared
            .check("link", result, &mut sink)
            .unwrap_or(shared.timing.link_poll_ms);
        if shared.is_halted() {
            break;
        }
        sleep_ms(delay).await;
    }
}

// ── Serial console ────────────────────────────────────────────

/// Handle at most one pending command byte. Returns `true` if a byte was
/// consumed.
pub async fn serial_step<I, F, T, C, S>(
    shared: &Shared<I, F>,
    session: &mut SerialSession,
    transport: &mut T,
    clock: &C,
    sink: &mut S,
) -> Result<bool, NodeError>
where
    I: I2c,
    F: FlashPort,
    T: Transport,
    C: ClockPort,
    S: EventSink,
{
    let byte = match transport.read_byte() {
        Ok(Some(b)) => b,
        Ok(None) => return Ok(false),
        Err(e) => {
            warn!("Serial: read failed: {:?}", e);
            return Ok(false);
        }
    };
    let Ok(command) = SerialCommand::try_from(byte) else {
        warn!("Serial: unknown command {:#04x}", byte);
        return Ok(true);
    };
    let mut node = shared.node.lock().await;
    session
        .handle(command, &mut node, transport, clock.uptime_secs(), sink)
        .await?;
    Ok(true)
}

pub async fn serial_task<I, F, T, C, S>(shared: &Shared<I, F>, mut transport: T, clock: &C, mut sink: S)
where
    I: I2c,
    F: FlashPort,
    T: Transport,
    C: ClockPort,
    S: EventSink,
{
    let mut session = SerialSession::new();
    while !shared.is_halted() {
        let result = serial_step(shared, &mut session, &mut transport, clock, &mut sink).await;
        // Drain back-to-back commands without sleeping.
        if shared.check("serial", result, &mut sink) == Some(true) {
            futures_lite::future::yield_now().await;
            continue;
        }
        if shared.is_halted() {
            break;
        }
        sleep_ms(shared.timing.serial_poll_ms).await;
    }
}

// ── Heartbeat ─────────────────────────────────────────────────

/// Blink the heartbeat LED and call `on_beat` (watchdog feed) each period.
pub async fn heartbeat_task<I, F, N, B>(shared: &Shared<I, F>, indicator: &N, mut on_beat: B)
where
    I: I2c,
    F: FlashPort,
    N: IndicatorPort,
    B: FnMut(),
{
    let blink = shared.timing.heartbeat_blink_ms;
    let rest = shared.timing.heartbeat_period_ms.saturating_sub(blink);
    while !shared.is_halted() {
        indicator.set_heartbeat(true);
        on_beat();
        sleep_ms(blink).await;
        indicator.set_heartbeat(false);
        sleep_ms(rest).await;
    }
}
