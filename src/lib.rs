//! Pulse Relay - live heart-rate telemetry from a pulse sensor.
//!
//! This library turns a stream of raw photoplethysmography readings into a
//! beats-per-minute estimate and republishes both to live subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Pulse Relay                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐            │
//! │  │   Source   │──▶│  Detector  │──▶│ Aggregator │            │
//! │  │  (lines)   │   │ (edges)    │   │ (5s bins)  │            │
//! │  └────────────┘   └────────────┘   └────────────┘            │
//! │        │ pulseData                        │ bpmData          │
//! │        ▼                                  ▼                  │
//! │  ┌──────────────────────────────────────────────┐            │
//! │  │        Publisher (per-subscriber queues)     │──▶ /ws     │
//! │  └──────────────────────────────────────────────┘            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use pulse_relay::{create_shared_stats, Pipeline, PipelineConfig, Publisher, PublisherConfig};
//!
//! let stats = create_shared_stats();
//! let publisher = Publisher::new(PublisherConfig::default(), stats.clone());
//! let mut subscriber = publisher.subscribe();
//!
//! let mut pipeline = Pipeline::with_stats(PipelineConfig::default(), Utc::now(), stats);
//! for line in ["800", "900", "abc", "700"] {
//!     if let Some(step) = pipeline.process_line(line, Utc::now()) {
//!         for event in step.events() {
//!             publisher.publish(event);
//!         }
//!     }
//! }
//!
//! let (pulses, _bpm) = subscriber.drain();
//! assert_eq!(pulses, vec![800, 900, 700]);
//! ```

pub mod config;
pub mod core;
pub mod relay;
pub mod source;
pub mod stats;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use self::core::{BeatDetector, BpmReading, Pipeline, PipelineConfig, RateAggregator, Step};
pub use relay::{Relay, RelayExit, ReplayClock};
pub use source::{LineSource, SourceError, SourceEvent, SourceInput};
pub use stats::{create_shared_stats, RelayStats, SharedRelayStats, StatsSnapshot};
pub use telemetry::{
    Publisher, PublisherConfig, SharedPublisher, SubscriberId, Subscription, TelemetryEvent,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
