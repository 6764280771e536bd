//! Line-oriented transport to the plant controller.

use crate::error::DaqResult;

pub mod mock;
pub mod serial;

pub use mock::MockLineSource;
pub use serial::SerialLineSource;

/// A duplex channel that yields decoded text lines.
pub trait LineSource {
    /// Reads the next complete line, trimmed and lossily decoded.
    ///
    /// Returns `Ok(None)` when the per-read timeout expires without a full
    /// line. Errors are fatal to the session.
    fn read_line(&mut self) -> DaqResult<Option<String>>;

    /// Writes `bytes` to the device.
    fn write_all(&mut self, bytes: &[u8]) -> DaqResult<()>;

    /// Discards anything queued in either direction.
    fn reset_buffers(&mut self) -> DaqResult<()>;

    /// Identifier used in logs and errors.
    fn name(&self) -> &str;
}

/// Decodes one raw line, replacing invalid UTF-8 and trimming whitespace.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}
