//! Telemetry fan-out for the pulse relay.
//!
//! This module contains:
//! - The outbound event kinds (`pulseData`, `bpmData`) and their wire format
//! - The publisher that delivers events to every registered subscriber

pub mod events;
pub mod publisher;

// Re-export commonly used types
pub use events::{TelemetryEvent, BPM_EVENT, PULSE_EVENT};
pub use publisher::{
    Publisher, PublisherConfig, SharedPublisher, SubscriberId, Subscription,
};
