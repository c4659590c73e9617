//! Impedance sensor node — Main Entry Point
//!
//! Hexagonal architecture with cooperative async tasks.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  I2cDriver (AD5933)  FlashAdapter   BleAdapter   SerialAdapter │
//! │  (embedded-hal I2c)  (FlashPort)    (LinkPort)   (Transport)   │
//! │  IndicatorAdapter    SystemClock    LogEventSink               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  Node: SweepEngine · RecordStore · Config              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Tasks: acquisition · link · serial · heartbeat (LocalExecutor)│
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;
use log::{error, info};

use impedance_node::adapters::ble::BleAdapter;
use impedance_node::adapters::device_id;
use impedance_node::adapters::flash::FlashAdapter;
use impedance_node::adapters::hardware::IndicatorAdapter;
use impedance_node::adapters::log_sink::LogEventSink;
use impedance_node::adapters::serial::SerialAdapter;
use impedance_node::adapters::time::SystemClock;
use impedance_node::app::ports::{IndicatorPort, LinkPort};
use impedance_node::app::service::Node;
use impedance_node::app::tasks::{self, Shared};
use impedance_node::config::TimingConfig;
use impedance_node::drivers::{hw_init, watchdog::Watchdog};
use impedance_node::pins;
use impedance_node::storage::RecordStore;
use impedance_node::sweep::SweepEngine;
use impedance_node::sweep::ad5933::FrontEndVariant;

/// Poll interval while waiting for the radio stack to come up.
const READY_POLL: Duration = Duration::from_millis(50);

/// Park forever with the fatal LED lit, still feeding the watchdog so
/// the error stays visible instead of reboot-looping.
fn halt(indicator: &IndicatorAdapter, watchdog: &Watchdog) -> ! {
    indicator.set_fatal();
    loop {
        watchdog.feed();
        std::thread::sleep(Duration::from_secs(1));
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Impedance node v{}               ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let indicator = IndicatorAdapter::new();
    let watchdog = Watchdog::new();
    if let Err(e) = hw_init::init_peripherals() {
        error!("HAL init failed: {} — halting", e);
        halt(&indicator, &watchdog);
    }

    // ── 2. Front-end bus ──────────────────────────────────────
    let peripherals = Peripherals::take()?;
    // SAFETY: these pins are claimed nowhere else.
    let (sda, scl) = unsafe {
        (
            AnyIOPin::new(pins::I2C_SDA_GPIO),
            AnyIOPin::new(pins::I2C_SCL_GPIO),
        )
    };
    let i2c_config = I2cConfig::new().baudrate(Hertz(pins::I2C_BAUD_HZ));
    let i2c = I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)?;

    // ── 3. Wireless stack: wait for ready ─────────────────────
    let mut ble = BleAdapter::new();
    if let Err(e) = ble.start() {
        error!("BLE start failed: {} — halting", e);
        halt(&indicator, &watchdog);
    }
    while !ble.is_ready() {
        watchdog.feed();
        std::thread::sleep(READY_POLL);
    }
    info!("BLE ready");

    // ── 4. Node startup ───────────────────────────────────────
    let timing = TimingConfig::default();
    let store = RecordStore::new(FlashAdapter::new())
        .with_polling(timing.store_poll_ms, timing.store_stall_polls);
    let engine = SweepEngine::new(i2c, FrontEndVariant::Ad5933);
    let mut node = Node::new(engine, store);
    let mut sink = LogEventSink::new();

    let started = futures_lite::future::block_on(node.start(device_id::random_bytes(), &mut sink));
    if let Err(e) = started {
        error!("Startup failed: {} — halting", e);
        halt(&indicator, &watchdog);
    }
    match node.config().advertised_name() {
        Ok(name) => {
            if let Err(e) = ble.set_device_name(&name) {
                error!("BLE name '{}' rejected: {}", name, e);
            }
        }
        Err(e) => error!("BLE name unavailable: {}", e),
    }

    // ── 5. Tasks ──────────────────────────────────────────────
    let serial = SerialAdapter::new()?;
    let clock = SystemClock::new();
    let shared = Shared::new(node, timing);

    let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
    executor
        .spawn(tasks::acquisition_task(&shared, &clock, &indicator, LogEventSink::new()))
        .detach();
    executor
        .spawn(tasks::link_task(&shared, ble, &clock, LogEventSink::new()))
        .detach();
    executor
        .spawn(tasks::serial_task(&shared, serial, &clock, LogEventSink::new()))
        .detach();
    executor
        .spawn(tasks::heartbeat_task(&shared, &indicator, || watchdog.feed()))
        .detach();

    info!("System ready. Running tasks.");

    // The executor runs until a task raises a fatal error.
    let fatal = futures_lite::future::block_on(executor.run(shared.wait_fatal()));
    error!("Halted: {}", fatal);
    halt(&indicator, &watchdog)
}
