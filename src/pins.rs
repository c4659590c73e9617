//! GPIO / peripheral pin assignments for the sensor node board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// I²C bus (impedance converter front end)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 6;
pub const I2C_SCL_GPIO: i32 = 7;
/// Standard-mode clock; the converter tops out at 400 kHz.
pub const I2C_BAUD_HZ: u32 = 100_000;

// ---------------------------------------------------------------------------
// Indicator LEDs (active HIGH)
// ---------------------------------------------------------------------------

/// Lit while a sweep is running.
pub const LED_BUSY_GPIO: i32 = 2;
/// Short blink every heartbeat period.
pub const LED_HEARTBEAT_GPIO: i32 = 3;
/// Latched on by an unrecoverable error.
pub const LED_FATAL_GPIO: i32 = 4;

/// Every indicator output, for bulk configuration.
pub const LED_GPIOS: [i32; 3] = [LED_BUSY_GPIO, LED_HEARTBEAT_GPIO, LED_FATAL_GPIO];
