//! Serial port input for pulse sensor boards.
//!
//! The port is opened with a short read timeout so the reader thread can
//! notice a stop request between bytes.

use crate::source::types::SourceError;
use std::io::Read;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Adapts a serial port handle to a plain byte reader.
struct SerialReader(Box<dyn tokio_serial::SerialPort>);

impl Read for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

/// Open `port` at `baud_rate` (8N1, no flow control).
pub fn open(port: &str, baud_rate: u32) -> Result<Box<dyn Read + Send>, SourceError> {
    tracing::info!(port, baud_rate, "Opening serial port");

    let handle = tokio_serial::new(port, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| SourceError::Serial(format!("Failed to open {port}: {e}")))?;

    Ok(Box::new(SerialReader(handle)))
}
