//! Core signal processing for the pulse relay.
//!
//! This module contains:
//! - Sample parsing and tagging
//! - Rising-edge beat detection
//! - Windowed BPM aggregation
//! - The pipeline that drives both for each incoming line

pub mod aggregator;
pub mod detector;
pub mod pipeline;
pub mod sample;

// Re-export commonly used types
pub use aggregator::{BpmReading, PartialWindow, RateAggregator, DEFAULT_WINDOW_SECS};
pub use detector::{BeatDetector, DEFAULT_THRESHOLD};
pub use pipeline::{Pipeline, PipelineConfig, Step};
pub use sample::{parse_sample_value, BeatEvent, Sample};
