//! Types shared by all sample sources.

use std::path::PathBuf;

/// What a sample source hands to the processing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One raw input line, newline stripped, not yet validated
    Line(String),
    /// The input reached end-of-stream
    Closed,
    /// The input failed and no more lines will arrive
    Failed(String),
}

/// Where samples are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    Stdin,
    File(PathBuf),
    Serial { port: String, baud_rate: u32 },
}

impl SourceInput {
    /// Interpret a CLI `--input` value; `-` means stdin.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            SourceInput::Stdin
        } else {
            SourceInput::File(PathBuf::from(arg))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceInput::Stdin => "stdin".to_string(),
            SourceInput::File(path) => format!("file {}", path.display()),
            SourceInput::Serial { port, baud_rate } => format!("serial {port} @ {baud_rate} baud"),
        }
    }
}

/// Errors that can occur while opening or running a source.
#[derive(Debug)]
pub enum SourceError {
    AlreadyRunning,
    Io(String),
    Serial(String),
    SerialUnsupported,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::AlreadyRunning => write!(f, "Source is already running"),
            SourceError::Io(e) => write!(f, "IO error: {e}"),
            SourceError::Serial(e) => write!(f, "Serial port error: {e}"),
            SourceError::SerialUnsupported => {
                write!(f, "Serial input requires the `serial` feature")
            }
        }
    }
}

impl std::error::Error for SourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_from_arg() {
        assert_eq!(SourceInput::from_arg("-"), SourceInput::Stdin);
        assert_eq!(
            SourceInput::from_arg("capture.txt"),
            SourceInput::File(PathBuf::from("capture.txt"))
        );
    }

    #[test]
    fn test_describe() {
        let serial = SourceInput::Serial {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
        };
        assert_eq!(serial.describe(), "serial /dev/ttyACM0 @ 9600 baud");
    }
}
