//! Indicator and watchdog drivers, plus one-shot peripheral setup.

pub mod hw_init;
pub mod status_led;
pub mod watchdog;
