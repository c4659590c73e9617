//! Entropy source for first-boot device identity.
//!
//! The node's three-letter id is generated once from the hardware RNG and
//! then persisted in the config record (see
//! [`device_id_from_entropy`](crate::config::device_id_from_entropy)).
//! The radio must be up for `esp_fill_random` to draw true entropy, so
//! call this after the link adapter is initialised.

/// Three random bytes from the hardware RNG.
#[cfg(target_os = "espidf")]
pub fn random_bytes() -> [u8; 3] {
    let mut bytes = [0u8; 3];
    // SAFETY: writes exactly `bytes.len()` bytes into a live buffer.
    unsafe {
        esp_idf_svc::sys::esp_fill_random(bytes.as_mut_ptr().cast(), bytes.len());
    }
    bytes
}

/// Simulation: deterministic bytes.
#[cfg(not(target_os = "espidf"))]
pub fn random_bytes() -> [u8; 3] {
    [0x2A, 0x80, 0xD5]
}
