//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements     | Connects to                  |
//! |-------------|----------------|------------------------------|
//! | `ble`       | LinkPort       | Bluedroid GATT server (NUS)  |
//! | `flash`     | FlashPort      | NVS / in-memory record log   |
//! | `hardware`  | IndicatorPort  | Status LED GPIOs             |
//! | `log_sink`  | EventSink      | Serial log output            |
//! | `serial`    | Transport      | USB serial/JTAG console      |
//! | `time`      | ClockPort      | ESP32 system timer           |
//! | `device_id` | (entropy)      | Hardware RNG                 |

pub mod ble;
pub mod device_id;
pub mod flash;
pub mod hardware;
pub mod log_sink;
pub mod serial;
pub mod time;
