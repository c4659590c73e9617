//! Hardware adapter: bridges the indicator LEDs to [`IndicatorPort`].
//!
//! The front end is handed to the sweep engine as a bare `I2c` bus and
//! needs no adapter; only status indication lives here.

use crate::app::ports::IndicatorPort;
use crate::drivers::status_led::StatusLed;

pub struct IndicatorAdapter {
    led: StatusLed,
}

impl Default for IndicatorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorAdapter {
    pub const fn new() -> Self {
        Self {
            led: StatusLed::new(),
        }
    }

    pub fn led(&self) -> &StatusLed {
        &self.led
    }
}

impl IndicatorPort for IndicatorAdapter {
    fn set_busy(&self, on: bool) {
        if !self.led.is_fatal() {
            self.led.set_busy(on);
        }
    }

    fn set_heartbeat(&self, on: bool) {
        self.led.set_heartbeat(on);
    }

    fn set_fatal(&self) {
        self.led.set_fatal();
    }
}
