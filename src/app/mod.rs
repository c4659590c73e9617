//! Application core — domain logic behind port traits.
//!
//! The [`service::Node`] coordinator owns the sweep engine and the record
//! store; the [`tasks`] loops drive it from timers, the wireless link and
//! the serial console. All interaction with hardware happens through
//! **port traits** defined in [`ports`], keeping this layer testable
//! without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod tasks;
