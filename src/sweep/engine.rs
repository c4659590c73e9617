//! Step-driven sweep state machine.
//!
//! ```text
//!   IDLE ─begin─▶ MEASURE_TEMP ─▶ PROGRAM ─▶ INIT_START ─▶ SWEEP_LOOP ─▶ POWER_DOWN ─▶ IDLE
//!                      │              │           │             │              ▲
//!                      └──────────────┴───────────┴─────────────┴── error ─────┘
//! ```
//!
//! Each [`SweepEngine::step`] performs at most one bus exchange group
//! (one status poll, one point readout, or one programming burst) so the
//! async wrapper [`SweepEngine::run`] can yield to the other tasks between
//! steps. Power-down is always issued before the engine returns to idle,
//! including after a failure.
//!
//! Waits are bounded by time, not by read count: a step that finds the
//! part busy asks the runner to sleep one poll interval, and gives up once
//! the polls cover twice the settling time of the current point plus a
//! conversion margin. After INIT_START the runner sleeps the settling time
//! of the start frequency before START_SWEEP is issued.

use core::time::Duration;

use async_io_mini::Timer;
use embedded_hal::i2c::I2c;
use futures_lite::future::yield_now;
use log::{debug, info, warn};

use super::ad5933::{
    self, ClockSource, Command, ControlWord, FrontEndVariant, OutputRange, PgaGain, BLOCK_READ,
    I2C_ADDRESS, SET_POINTER, reg, status,
};
use super::{Point, SweepDataset, SweepParameters};
use crate::error::SweepError;

/// Sleep between status reads while the part is busy.
pub const STATUS_POLL_MS: u64 = 10;
/// Allowance for one conversion (temperature or DFT) on top of settling.
pub const CONVERSION_MARGIN_MS: u64 = 100;

/// How long a wait for point `index` may last before it times out.
pub fn wait_budget_ms(params: &SweepParameters, index: u32) -> u64 {
    2 * params.settling_ms(index) + CONVERSION_MARGIN_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Idle,
    MeasureTemp,
    Program,
    InitStart,
    SweepLoop,
    PowerDown,
}

/// Outcome of one [`SweepEngine::step`].
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Pending,
    Complete(SweepDataset),
    Failed(SweepError),
}

/// In-flight sweep bookkeeping.
struct Run {
    params: SweepParameters,
    dataset: SweepDataset,
    /// Command for the current phase has been written; now polling.
    issued: bool,
    /// A result is waiting in the data registers.
    ready: bool,
    /// START_SWEEP has followed INIT_START.
    started: bool,
    polls: u32,
    /// Sleep requested by the last step.
    delay_ms: u64,
    error: Option<SweepError>,
}

pub struct SweepEngine<I> {
    bus: I,
    variant: FrontEndVariant,
    phase: SweepPhase,
    run: Option<Run>,
    poll_interval_ms: u64,
}

impl<I: I2c> SweepEngine<I> {
    pub fn new(bus: I, variant: FrontEndVariant) -> Self {
        Self {
            bus,
            variant,
            phase: SweepPhase::Idle,
            run: None,
            poll_interval_ms: STATUS_POLL_MS,
        }
    }

    /// Sleep between status reads. Zero disables every wait, which suits
    /// host simulation; timeouts are then counted in 1 ms polls.
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Take the sleep requested by the last step, if any.
    pub fn take_delay(&mut self) -> u64 {
        self.run
            .as_mut()
            .map_or(0, |run| core::mem::take(&mut run.delay_ms))
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn variant(&self) -> FrontEndVariant {
        self.variant
    }

    /// Give the bus back (tests inspect mock state through this).
    pub fn release(self) -> I {
        self.bus
    }

    pub fn bus_mut(&mut self) -> &mut I {
        &mut self.bus
    }

    /// Put the front end into a known state: reset, then power down.
    pub fn reset(&mut self) -> Result<(), SweepError> {
        let mut cw = idle_control(Command::PowerDown);
        cw.reset = true;
        self.write_control(cw)?;
        cw.reset = false;
        self.write_control(cw)?;
        self.phase = SweepPhase::Idle;
        self.run = None;
        Ok(())
    }

    /// Arm a new sweep. Rejects parameters the part cannot represent.
    pub fn begin(&mut self, params: &SweepParameters) -> Result<(), SweepError> {
        params.validate(self.variant)?;
        if self.phase != SweepPhase::Idle {
            warn!("Sweep: begin while {:?}, restarting", self.phase);
        }
        self.run = Some(Run {
            params: *params,
            dataset: SweepDataset::with_capacity(params.num_points() as usize),
            issued: false,
            ready: false,
            started: false,
            polls: 0,
            delay_ms: 0,
            error: None,
        });
        self.phase = SweepPhase::MeasureTemp;
        debug!(
            "Sweep: {} points from {} Hz step {} Hz",
            params.num_points(),
            params.start_hz,
            params.delta_hz
        );
        Ok(())
    }

    /// Advance the state machine by one unit of bus work.
    pub fn step(&mut self) -> Step {
        let result = match self.phase {
            SweepPhase::Idle => return Step::Failed(SweepError::NotStarted),
            SweepPhase::MeasureTemp => self.step_temperature(),
            SweepPhase::Program => self.step_program(),
            SweepPhase::InitStart => self.step_init_start(),
            SweepPhase::SweepLoop => self.step_sweep_loop(),
            SweepPhase::PowerDown => return self.step_power_down(),
        };
        if let Err(e) = result {
            warn!("Sweep: {:?} aborted: {}", self.phase, e);
            if let Some(run) = self.run.as_mut() {
                run.error = Some(e);
            }
            self.phase = SweepPhase::PowerDown;
        }
        Step::Pending
    }

    /// Run a whole sweep, sleeping where a step asks to and yielding to
    /// the executor otherwise.
    pub async fn run(&mut self, params: &SweepParameters) -> Result<SweepDataset, SweepError> {
        self.begin(params)?;
        loop {
            match self.step() {
                Step::Pending => match self.take_delay() {
                    0 => yield_now().await,
                    ms => {
                        Timer::after(Duration::from_millis(ms)).await;
                    }
                },
                Step::Complete(ds) => return Ok(ds),
                Step::Failed(e) => return Err(e),
            }
        }
    }

    /// Run a whole sweep without yielding or sleeping. Host only.
    #[cfg(not(target_os = "espidf"))]
    pub fn run_blocking(&mut self, params: &SweepParameters) -> Result<SweepDataset, SweepError> {
        self.begin(params)?;
        loop {
            match self.step() {
                Step::Pending => {}
                Step::Complete(ds) => return Ok(ds),
                Step::Failed(e) => return Err(e),
            }
        }
    }

    // ── Phases ────────────────────────────────────────────────

    fn step_temperature(&mut self) -> Result<(), SweepError> {
        let run = self.run.as_ref().ok_or(SweepError::NotStarted)?;
        if !run.issued {
            let cw = run_control(&run.params, Command::MeasureTemp);
            self.write_control(cw)?;
            return self.mark_issued();
        }
        if !self.poll(status::TEMP_VALID)? {
            return Ok(());
        }
        let mut raw = [0u8; 2];
        self.read_block(reg::TEMP_DATA, &mut raw)?;
        let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
        run.dataset.meta.temperature = ad5933::temperature_celsius(raw[0], raw[1]);
        self.enter(SweepPhase::Program)
    }

    fn step_program(&mut self) -> Result<(), SweepError> {
        let params = self.run.as_ref().ok_or(SweepError::NotStarted)?.params;
        let start = ad5933::frequency_code(params.start_hz, params.clock_hz, self.variant)?;
        let delta = ad5933::frequency_code(params.delta_hz, params.clock_hz, self.variant)?;

        self.write_bytes(reg::START_FREQ, &ad5933::code_bytes(start))?;
        self.write_bytes(reg::DELTA_FREQ, &ad5933::code_bytes(delta))?;
        self.write_bytes(reg::NUM_STEPS, &ad5933::steps_bytes(params.steps))?;
        self.write_bytes(
            reg::NUM_CYCLES,
            &ad5933::cycles_bytes(params.settling_cycles, params.multiplier),
        )?;

        let mut cw = run_control(&params, Command::Standby);
        cw.reset = true;
        self.write_control(cw)?;
        cw.reset = false;
        self.write_control(cw)?;
        self.enter(SweepPhase::InitStart)
    }

    fn step_init_start(&mut self) -> Result<(), SweepError> {
        let run = self.run.as_ref().ok_or(SweepError::NotStarted)?;
        let params = run.params;
        if !run.issued {
            self.write_control(run_control(&params, Command::InitStartFreq))?;
            let settle = if self.poll_interval_ms == 0 {
                0
            } else {
                params.settling_ms(0)
            };
            let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
            run.issued = true;
            run.delay_ms = settle;
            return Ok(());
        }
        if !run.started {
            self.write_control(run_control(&params, Command::StartSweep))?;
            let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
            run.started = true;
            return Ok(());
        }
        if self.poll(status::DATA_VALID)? {
            self.enter(SweepPhase::SweepLoop)?;
            let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
            // Point 0 is already latched; the loop reads it without re-polling.
            run.issued = true;
            run.ready = true;
        }
        Ok(())
    }

    fn step_sweep_loop(&mut self) -> Result<(), SweepError> {
        let run = self.run.as_ref().ok_or(SweepError::NotStarted)?;
        if !run.issued {
            let params = run.params;
            self.write_control(run_control(&params, Command::IncrementFreq))?;
            return self.mark_issued();
        }
        if !run.ready && !self.poll(status::DATA_VALID)? {
            return Ok(());
        }

        let mut raw = [0u8; 4];
        self.read_block(reg::REAL_DATA, &mut raw)?;

        let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
        let index = run.dataset.len() as u32;
        run.dataset.push(Point {
            freq: run.params.frequency_at(index),
            real: i16::from_be_bytes([raw[0], raw[1]]),
            imag: i16::from_be_bytes([raw[2], raw[3]]),
        });
        run.polls = 0;
        run.ready = false;

        if run.dataset.len() as u32 >= run.params.num_points() {
            self.phase = SweepPhase::PowerDown;
        } else {
            run.issued = false;
        }
        Ok(())
    }

    fn step_power_down(&mut self) -> Step {
        let run = self.run.take();
        self.phase = SweepPhase::Idle;
        let cw = run
            .as_ref()
            .map_or(idle_control(Command::PowerDown), |r| {
                run_control(&r.params, Command::PowerDown)
            });
        let powered_down = self.write_control(cw);

        let Some(run) = run else {
            return Step::Failed(SweepError::NotStarted);
        };
        if let Some(e) = run.error {
            return Step::Failed(e);
        }
        if let Err(e) = powered_down {
            warn!("Sweep: power-down failed: {}", e);
            return Step::Failed(e);
        }
        info!(
            "Sweep: complete, {} points, {} °C",
            run.dataset.len(),
            run.dataset.meta.temperature
        );
        Step::Complete(run.dataset)
    }

    // ── Helpers ───────────────────────────────────────────────

    fn enter(&mut self, phase: SweepPhase) -> Result<(), SweepError> {
        let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
        run.issued = false;
        run.ready = false;
        run.polls = 0;
        self.phase = phase;
        Ok(())
    }

    fn mark_issued(&mut self) -> Result<(), SweepError> {
        let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
        run.issued = true;
        Ok(())
    }

    /// One status read. `Ok(false)` means not ready yet, within budget;
    /// the runner then sleeps one poll interval.
    fn poll(&mut self, mask: u8) -> Result<bool, SweepError> {
        let value = self.read_register(reg::STATUS)?;
        if value & mask != 0 {
            return Ok(true);
        }
        let interval = self.poll_interval_ms;
        let temperature = self.phase == SweepPhase::MeasureTemp;
        let run = self.run.as_mut().ok_or(SweepError::NotStarted)?;
        let budget_ms = if temperature {
            CONVERSION_MARGIN_MS
        } else {
            wait_budget_ms(&run.params, run.dataset.len() as u32)
        };
        run.polls += 1;
        if u64::from(run.polls) * interval.max(1) >= budget_ms {
            return Err(SweepError::PollTimeout);
        }
        run.delay_ms = interval;
        Ok(false)
    }

    fn write_control(&mut self, cw: ControlWord) -> Result<(), SweepError> {
        self.write_bytes(reg::CONTROL_HIGH, &cw.encode())
    }

    /// Byte-wise register writes starting at `first`.
    fn write_bytes(&mut self, first: u8, bytes: &[u8]) -> Result<(), SweepError> {
        for (offset, &value) in bytes.iter().enumerate() {
            self.bus
                .write(I2C_ADDRESS, &[first + offset as u8, value])
                .map_err(|_| SweepError::Bus)?;
        }
        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u8, SweepError> {
        let mut value = [0u8; 1];
        self.bus
            .write(I2C_ADDRESS, &[SET_POINTER, register])
            .map_err(|_| SweepError::Bus)?;
        self.bus
            .read(I2C_ADDRESS, &mut value)
            .map_err(|_| SweepError::Bus)?;
        Ok(value[0])
    }

    fn read_block(&mut self, first: u8, buf: &mut [u8]) -> Result<(), SweepError> {
        self.bus
            .write(I2C_ADDRESS, &[SET_POINTER, first])
            .map_err(|_| SweepError::Bus)?;
        self.bus
            .write(I2C_ADDRESS, &[BLOCK_READ, buf.len() as u8])
            .map_err(|_| SweepError::Bus)?;
        self.bus.read(I2C_ADDRESS, buf).map_err(|_| SweepError::Bus)
    }
}

fn run_control(params: &SweepParameters, command: Command) -> ControlWord {
    ControlWord {
        command,
        range: params.range,
        gain: params.gain,
        clock: params.clock,
        reset: false,
    }
}

fn idle_control(command: Command) -> ControlWord {
    ControlWord {
        command,
        range: OutputRange::Range1,
        gain: PgaGain::X1,
        clock: ClockSource::Internal,
        reset: false,
    }
}
