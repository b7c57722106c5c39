//! Rising-edge beat detection.
//!
//! A beat is reported once per upward crossing of a fixed threshold. The
//! detector re-arms only when a sample falls strictly below the threshold, so
//! a signal hovering above it produces a single beat no matter how long it stays there.

use crate::core::sample::{BeatEvent, Sample};

/// Default threshold on a 0-1023 scale.
pub const DEFAULT_THRESHOLD: i32 = 850;

/// Fixed-threshold edge detector.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    threshold: i32,
    above_threshold: bool,
}

impl BeatDetector {
    pub fn new(threshold: i32) -> Self {
        Self {
            threshold,
            above_threshold: false,
        }
    }

    /// Feed one sample, returning a beat if it is a rising crossing.
    pub fn process(&mut self, sample: &Sample) -> Option<BeatEvent> {
        if sample.value > self.threshold && !self.above_threshold {
            self.above_threshold = true;
            Some(BeatEvent { seq: sample.seq })
        } else {
            if sample.value < self.threshold {
                self.above_threshold = false;
            }
            None
        }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Whether the last sample left the detector above the threshold.
    pub fn is_above_threshold(&self) -> bool {
        self.above_threshold
    }
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
