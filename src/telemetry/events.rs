//! Outbound telemetry events.

use serde::{Deserialize, Serialize};

/// Event name for raw samples.
pub const PULSE_EVENT: &str = "pulseData";

/// Event name for BPM updates.
pub const BPM_EVENT: &str = "bpmData";

/// An event delivered to subscribers.
///
/// Serialized as `{"event": "pulseData", "data": 900}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum TelemetryEvent {
    /// One accepted raw sample
    #[serde(rename = "pulseData")]
    Pulse(i32),
    /// One completed aggregation window
    #[serde(rename = "bpmData")]
    Bpm(u32),
}

impl TelemetryEvent {
    /// The wire name of this event kind.
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::Pulse(_) => PULSE_EVENT,
            TelemetryEvent::Bpm(_) => BPM_EVENT,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
