//! The signal-to-metric pipeline.
//!
//! A [`Pipeline`] owns the detector and aggregator state and is driven by a
//! single caller. Each call processes one input line (or one clock tick) to
//! completion and hands back the events to publish, so no two samples' updates
//! can interleave.

use crate::core::aggregator::{BpmReading, PartialWindow, RateAggregator};
use crate::core::detector::BeatDetector;
use crate::core::sample::{parse_sample_value, BeatEvent, Sample};
use crate::stats::{create_shared_stats, SharedRelayStats};
use crate::telemetry::TelemetryEvent;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Detection and aggregation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub threshold: i32,
    pub window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: crate::core::detector::DEFAULT_THRESHOLD,
            window: Duration::from_secs(crate::core::aggregator::DEFAULT_WINDOW_SECS),
        }
    }
}

/// The result of processing one accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub sample: Sample,
    pub beat: Option<BeatEvent>,
    pub reading: Option<BpmReading>,
}

impl Step {
    /// Outbound events in publish order: the raw sample, then any BPM update.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        let mut events = vec![TelemetryEvent::Pulse(self.sample.value)];
        if let Some(reading) = self.reading {
            events.push(TelemetryEvent::Bpm(reading.bpm));
        }
        events
    }
}

/// Beat detector plus rate aggregator, owned by one processing loop.
pub struct Pipeline {
    detector: BeatDetector,
    aggregator: RateAggregator,
    next_seq: u64,
    stats: SharedRelayStats,
}

impl Pipeline {
    /// Create a pipeline whose first window opens at `start`.
    pub fn new(config: PipelineConfig, start: DateTime<Utc>) -> Self {
        Self::with_stats(config, start, create_shared_stats())
    }

    pub fn with_stats(
        config: PipelineConfig,
        start: DateTime<Utc>,
        stats: SharedRelayStats,
    ) -> Self {
        Self {
            detector: BeatDetector::new(config.threshold),
            aggregator: RateAggregator::new(config.window, start),
            next_seq: 0,
            stats,
        }
    }

    /// Process one raw input line received at `now`.
    ///
    /// Malformed lines return `None` and leave all state untouched.
    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) -> Option<Step> {
        match parse_sample_value(line) {
            Some(value) => Some(self.process_value(value, now)),
            None => {
                tracing::trace!(line = line.trim(), "Discarding malformed sample line");
                self.stats.record_rejected_line();
                None
            }
        }
    }

    /// Process one parsed sample value received at `now`.
    pub fn process_value(&mut self, value: i32, now: DateTime<Utc>) -> Step {
        let sample = Sample::new(self.next_seq, value, now);
        self.next_seq += 1;
        self.stats.record_sample();

        let beat = self.detector.process(&sample);
        if let Some(beat) = beat {
            tracing::trace!(seq = beat.seq, value, "Beat detected");
            self.aggregator.on_beat();
            self.stats.record_beat();
        }

        let reading = self.tick(now);

        Step {
            sample,
            beat,
            reading,
        }
    }

    /// Close the current window if it has elapsed. Safe to call while idle.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<BpmReading> {
        let reading = self.aggregator.tick(now)?;
        tracing::debug!(
            bpm = reading.bpm,
            beats = reading.beats,
            "Aggregation window closed"
        );
        self.stats.record_window(reading.bpm);
        Some(reading)
    }

    /// Stop processing: the in-progress window is discarded, never published.
    pub fn shutdown(&mut self, now: DateTime<Utc>) -> PartialWindow {
        let partial = self.aggregator.discard_partial(now);
        tracing::debug!(
            beats = partial.beats,
            window_start = %partial.window_start,
            "Discarded partial aggregation window"
        );
        partial
    }

    /// How long after `now` the current window is due to close.
    pub fn time_until_window_close(&self, now: DateTime<Utc>) -> Duration {
        self.aggregator.time_until_close(now)
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn aggregator(&self) -> &RateAggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> &SharedRelayStats {
        &self.stats
    }

    /// Number of samples accepted so far.
    pub fn samples_processed(&self) -> u64 {
        self.next_seq
    }
}
