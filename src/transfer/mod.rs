//! Transfer protocols: polled serial commands and wireless chunked streaming.

pub mod serial;
pub mod transport;
pub mod wireless;

pub use serial::SerialSession;
pub use transport::Transport;
pub use wireless::{BurstOutcome, WirelessTransfer};
