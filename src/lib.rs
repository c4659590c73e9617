//! Impedance-spectroscopy sensor node firmware library.
//!
//! Exposes the domain modules for integration testing and host-side
//! simulation. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod storage;
pub mod sweep;
pub mod transfer;

pub mod adapters;
pub mod drivers;
pub mod pins;
