//! Relay statistics.
//!
//! Lock-free counters shared between the processing loop, the publisher and the
//! status endpoint. Nothing here is persisted; counters live for one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one relay session.
#[derive(Debug)]
pub struct RelayStats {
    /// Lines that parsed as samples
    samples_accepted: AtomicU64,
    /// Lines discarded as malformed
    lines_rejected: AtomicU64,
    /// Rising edges detected
    beats_detected: AtomicU64,
    /// Aggregation windows closed
    windows_completed: AtomicU64,
    /// Most recently published BPM
    last_bpm: AtomicU32,
    has_bpm: AtomicBool,
    /// Currently registered subscribers
    subscribers_connected: AtomicU64,
    /// Subscribers removed as unresponsive or gone
    subscribers_dropped: AtomicU64,
    /// Events a full subscriber queue could not take
    events_dropped: AtomicU64,
    session_start: DateTime<Utc>,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            samples_accepted: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            beats_detected: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            last_bpm: AtomicU32::new(0),
            has_bpm: AtomicBool::new(false),
            subscribers_connected: AtomicU64::new(0),
            subscribers_dropped: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_sample(&self) {
        self.samples_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_line(&self) {
        self.lines_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_beat(&self) {
        self.beats_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window(&self, bpm: u32) {
        self.windows_completed.fetch_add(1, Ordering::Relaxed);
        self.last_bpm.store(bpm, Ordering::Relaxed);
        self.has_bpm.store(true, Ordering::Release);
    }

    pub fn record_subscriber_connected(&self) {
        self.subscribers_connected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a subscriber leaving. `dropped` marks removals the subscriber did
    /// not ask for.
    pub fn record_subscriber_removed(&self, dropped: bool) {
        let _ = self
            .subscribers_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if dropped {
            self.subscribers_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
            beats_detected: self.beats_detected.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            last_bpm: self
                .has_bpm
                .load(Ordering::Acquire)
                .then(|| self.last_bpm.load(Ordering::Relaxed)),
            subscribers_connected: self.subscribers_connected.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary printed at shutdown.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Samples relayed: {}\n\
             - Malformed lines discarded: {}\n\
             - Beats detected: {}\n\
             - Windows completed: {}\n\
             - Last BPM: {}\n\
             - Subscribers dropped: {}\n\
             - Events dropped: {}\n\
             - Session duration: {} seconds",
            stats.samples_accepted,
            stats.lines_rejected,
            stats.beats_detected,
            stats.windows_completed,
            stats
                .last_bpm
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            stats.subscribers_dropped,
            stats.events_dropped,
            stats.session_duration_secs
        )
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`RelayStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_accepted: u64,
    pub lines_rejected: u64,
    pub beats_detected: u64,
    pub windows_completed: u64,
    pub last_bpm: Option<u32>,
    pub subscribers_connected: u64,
    pub subscribers_dropped: u64,
    pub events_dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared statistics.
pub type SharedRelayStats = Arc<RelayStats>;

pub fn create_shared_stats() -> SharedRelayStats {
    Arc::new(RelayStats::new())
}
