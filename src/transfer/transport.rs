//! Transport abstraction — any polled byte-oriented channel.
//!
//! The serial command protocol is generic over `Transport`; on the node it
//! is backed by the USB serial/JTAG port, in tests by an in-memory pipe.
//! Replies are raw bytes with no framing, so a partial write must be
//! retried until the whole reply is out.

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&self) -> bool;

    /// Next byte, if one is waiting.
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut b = [0u8; 1];
        Ok((self.read(&mut b)? == 1).then_some(b[0]))
    }

    /// Write all of `data`, retrying partial writes. A transport that
    /// accepts nothing reports `Ok(false)` rather than spinning.
    fn write_all(&mut self, mut data: &[u8]) -> Result<bool, Self::Error> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Ok(false);
            }
            data = &data[n..];
        }
        Ok(true)
    }
}
