//! Sample types for the pulse pipeline.
//!
//! A sample is one integer amplitude reading from the pulse sensor, tagged with
//! its arrival order. Samples are never stored beyond the current processing step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single amplitude reading, tagged with arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic arrival sequence number (starts at 0)
    pub seq: u64,
    /// Raw amplitude, conventionally 0-1023 (10-bit ADC)
    pub value: i32,
    /// When the sample was received
    pub received_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(seq: u64, value: i32, received_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            value,
            received_at,
        }
    }
}

/// Parse one input line into a sample value.
///
/// Surrounding whitespace (including the `\r` some boards emit) is trimmed.
/// Anything that is not a base-10 integer yields `None`.
pub fn parse_sample_value(line: &str) -> Option<i32> {
    line.trim().parse::<i32>().ok()
}

/// Emitted by the beat detector on a rising threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatEvent {
    /// Sequence number of the sample that crossed the threshold
    pub seq: u64,
}
