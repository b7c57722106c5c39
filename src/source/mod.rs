//! Sample sources for the pulse relay.
//!
//! A source turns a byte stream (stdin, a recorded capture, or a serial port)
//! into raw text lines delivered over a channel. Lines are not validated here.

pub mod reader;
pub mod types;

#[cfg(feature = "serial")]
pub mod serial;

// Re-export commonly used types
pub use reader::{pump_lines, LineSource};
pub use types::{SourceError, SourceEvent, SourceInput};
