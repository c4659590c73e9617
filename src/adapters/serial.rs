//! Serial transport over the USB serial/JTAG console.
//!
//! Implements [`Transport`] for the polled serial command protocol.
//!
//! - **`target_os = "espidf"`**: installs the `usb_serial_jtag` driver and
//!   reads/writes with a zero tick timeout, so polling never blocks the
//!   executor.
//! - **`not(target_os = "espidf")`**: in-memory RX/TX queues that tests
//!   and the simulator push into and drain.

use log::info;

use crate::transfer::Transport;

// ── Error type ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// Driver install failed (ESP-IDF return code).
    Install(i32),
    Io,
}

impl core::fmt::Display for SerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Install(rc) => write!(f, "serial: driver install failed (rc={})", rc),
            Self::Io => write!(f, "serial: I/O error"),
        }
    }
}

// ── ESP-IDF implementation ───────────────────────────────────

#[cfg(target_os = "espidf")]
mod imp {
    use esp_idf_svc::sys::*;

    use super::SerialError;

    const RX_BUFFER: u32 = 256;
    const TX_BUFFER: u32 = 1024;
    /// Ticks a write may wait for TX space before reporting a short write.
    const WRITE_TICKS: u32 = 10;

    pub struct Port;

    impl Port {
        pub fn open() -> Result<Self, SerialError> {
            let mut cfg = usb_serial_jtag_driver_config_t {
                rx_buffer_size: RX_BUFFER,
                tx_buffer_size: TX_BUFFER,
            };
            // SAFETY: called once from main() before any read/write.
            let ret = unsafe { usb_serial_jtag_driver_install(&mut cfg) };
            if ret != ESP_OK as i32 {
                return Err(SerialError::Install(ret));
            }
            Ok(Self)
        }

        pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
            // SAFETY: buf is valid for buf.len() bytes.
            let n = unsafe {
                usb_serial_jtag_read_bytes(buf.as_mut_ptr().cast(), buf.len() as u32, 0)
            };
            if n < 0 {
                return Err(SerialError::Io);
            }
            Ok(n as usize)
        }

        pub fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
            // SAFETY: data is valid for data.len() bytes.
            let n = unsafe {
                usb_serial_jtag_write_bytes(data.as_ptr().cast(), data.len(), WRITE_TICKS)
            };
            if n < 0 {
                return Err(SerialError::Io);
            }
            Ok(n as usize)
        }

        pub fn flush(&mut self) -> Result<(), SerialError> {
            Ok(())
        }

        pub fn available(&self) -> bool {
            // The driver exposes no RX level query; callers poll read().
            true
        }
    }
}

// ── Simulation implementation ────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod imp {
    use std::collections::VecDeque;

    use super::SerialError;

    #[derive(Default)]
    pub struct Port {
        pub(super) rx: VecDeque<u8>,
        pub(super) tx: Vec<u8>,
    }

    impl Port {
        pub fn open() -> Result<Self, SerialError> {
            Ok(Self::default())
        }

        pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
            let n = buf.len().min(self.rx.len());
            for (slot, b) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = b;
            }
            Ok(n)
        }

        pub fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
            self.tx.extend_from_slice(data);
            Ok(data.len())
        }

        pub fn flush(&mut self) -> Result<(), SerialError> {
            Ok(())
        }

        pub fn available(&self) -> bool {
            !self.rx.is_empty()
        }
    }
}

// ── Public adapter ───────────────────────────────────────────

pub struct SerialAdapter {
    port: imp::Port,
}

impl SerialAdapter {
    pub fn new() -> Result<Self, SerialError> {
        let port = imp::Port::open()?;
        info!("Serial: console transport ready");
        Ok(Self { port })
    }

    /// Queue bytes as if the host had sent them.
    #[cfg(not(target_os = "espidf"))]
    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.port.rx.extend(bytes.iter().copied());
    }

    /// Drain everything written so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn take_tx(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.port.tx)
    }
}

impl Transport for SerialAdapter {
    type Error = SerialError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        self.port.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        self.port.write(data)
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        self.port.flush()
    }

    fn available(&self) -> bool {
        self.port.available()
    }
}
