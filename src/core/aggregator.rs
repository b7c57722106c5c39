//! Windowed beat-rate aggregation.
//!
//! Beats are counted over fixed-duration windows. When a window closes its count
//! is scaled to a per-minute rate and the window restarts at the closing instant.
//! Time is always passed in, so the aggregator never reads the clock itself.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default aggregation window in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 5;

/// The rate produced when a window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpmReading {
    /// Beats per minute, scaled from the window's beat count
    pub bpm: u32,
    /// Beats counted in the window
    pub beats: u32,
    /// When the window opened
    pub window_start: DateTime<Utc>,
    /// When the window was closed
    pub window_end: DateTime<Utc>,
}

/// Beats counted in a window that never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialWindow {
    pub window_start: DateTime<Utc>,
    pub beats: u32,
}

/// Counts beats and converts them to BPM at window boundaries.
#[derive(Debug, Clone)]
pub struct RateAggregator {
    window: Duration,
    window_start: DateTime<Utc>,
    beat_count: u32,
}

impl RateAggregator {
    /// Create an aggregator whose first window opens at `start`.
    ///
    /// A zero-length window is clamped to one millisecond.
    pub fn new(window: std::time::Duration, start: DateTime<Utc>) -> Self {
        let millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            window: Duration::milliseconds(millis),
            window_start: start,
            beat_count: 0,
        }
    }

    /// Record one beat in the current window.
    pub fn on_beat(&mut self) {
        self.beat_count = self.beat_count.saturating_add(1);
    }

    /// Close the current window if it has elapsed at `now`.
    ///
    /// Returns exactly one reading per completed window. A `now` earlier than
    /// the window start (clock step backwards) never closes the window.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<BpmReading> {
        if now < self.window_start || now - self.window_start < self.window {
            return None;
        }

        let reading = BpmReading {
            bpm: self.scale_to_bpm(self.beat_count),
            beats: self.beat_count,
            window_start: self.window_start,
            window_end: now,
        };

        self.window_start = now;
        self.beat_count = 0;

        Some(reading)
    }

    /// Convert a beat count to BPM using the configured window length, rounded
    /// to the nearest integer.
    pub fn scale_to_bpm(&self, beats: u32) -> u32 {
        let window_ms = self.window.num_milliseconds() as u64;
        let bpm = (beats as u64 * 60_000 + window_ms / 2) / window_ms;
        u32::try_from(bpm).unwrap_or(u32::MAX)
    }

    /// Abandon the in-progress window, returning what it had counted.
    ///
    /// The window restarts at `now` (or stays put if `now` is earlier).
    pub fn discard_partial(&mut self, now: DateTime<Utc>) -> PartialWindow {
        let partial = PartialWindow {
            window_start: self.window_start,
            beats: self.beat_count,
        };
        if now > self.window_start {
            self.window_start = now;
        }
        self.beat_count = 0;
        partial
    }

    pub fn beat_count(&self) -> u32 {
        self.beat_count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// How long after `now` the current window is due to close.
    ///
    /// Zero once the window has elapsed. A `now` before the window start
    /// reports the full window length.
    pub fn time_until_close(&self, now: DateTime<Utc>) -> std::time::Duration {
        let elapsed = if now > self.window_start {
            now - self.window_start
        } else {
            Duration::zero()
        };
        (self.window - elapsed).to_std().unwrap_or_default()
    }
}
