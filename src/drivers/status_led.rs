//! Indicator LED driver.
//!
//! Three discrete GPIO LEDs: busy, heartbeat and fatal.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives the pins configured by hw_init.
//! On host/test: tracks state in-memory only.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::drivers::hw_init;
use crate::pins;

/// Indicator levels are written from several tasks, so state is atomic.
pub struct StatusLed {
    busy: AtomicBool,
    heartbeat: AtomicBool,
    fatal: AtomicBool,
}

impl Default for StatusLed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLed {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            heartbeat: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
        }
    }

    pub fn set_busy(&self, on: bool) {
        hw_init::gpio_write(pins::LED_BUSY_GPIO, on);
        self.busy.store(on, Ordering::Relaxed);
    }

    pub fn set_heartbeat(&self, on: bool) {
        hw_init::gpio_write(pins::LED_HEARTBEAT_GPIO, on);
        self.heartbeat.store(on, Ordering::Relaxed);
    }

    /// Latches; there is no way back short of a reset.
    pub fn set_fatal(&self) {
        hw_init::gpio_write(pins::LED_FATAL_GPIO, true);
        hw_init::gpio_write(pins::LED_BUSY_GPIO, false);
        self.fatal.store(true, Ordering::Relaxed);
        self.busy.store(false, Ordering::Relaxed);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn is_heartbeat_on(&self) -> bool {
        self.heartbeat.load(Ordering::Relaxed)
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }
}
