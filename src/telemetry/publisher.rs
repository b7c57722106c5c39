//! Fan-out of telemetry events to live subscribers.
//!
//! Every subscriber owns two bounded FIFO queues, one per event kind. The
//! publisher only ever uses `try_send`, so a slow consumer can lose events but
//! can never hold up the pipeline or other subscribers. A subscriber whose pulse
//! queue stays full for too long is removed from the registry.

use crate::stats::SharedRelayStats;
use crate::telemetry::events::TelemetryEvent;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use uuid::Uuid;

/// Queue sizing and eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Per-subscriber capacity of the `pulseData` queue
    pub pulse_queue_capacity: usize,
    /// Per-subscriber capacity of the `bpmData` queue
    pub bpm_queue_capacity: usize,
    /// Consecutive full `pulseData` deliveries before a subscriber is evicted
    pub max_missed_events: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            pulse_queue_capacity: 256,
            bpm_queue_capacity: 16,
            max_missed_events: 128,
        }
    }
}

/// Opaque subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Slot {
    pulses: mpsc::Sender<i32>,
    bpm: mpsc::Sender<u32>,
    /// Consecutive `pulseData` sends that found the queue full
    pulse_misses: AtomicU32,
}

enum Delivery {
    Sent,
    Full,
    Gone,
}

impl Slot {
    fn deliver(&self, event: TelemetryEvent) -> Delivery {
        let result = match event {
            TelemetryEvent::Pulse(value) => self.pulses.try_send(value).map_err(|e| match e {
                TrySendError::Full(_) => Delivery::Full,
                TrySendError::Closed(_) => Delivery::Gone,
            }),
            TelemetryEvent::Bpm(bpm) => self.bpm.try_send(bpm).map_err(|e| match e {
                TrySendError::Full(_) => Delivery::Full,
                TrySendError::Closed(_) => Delivery::Gone,
            }),
        };
        result.map(|_| Delivery::Sent).unwrap_or_else(|d| d)
    }
}

/// Registry of subscribers plus the publish primitive.
pub struct Publisher {
    config: PublisherConfig,
    registry: RwLock<HashMap<SubscriberId, Slot>>,
    last_bpm: Mutex<Option<u32>>,
    closed: AtomicBool,
    stats: SharedRelayStats,
}

/// Thread-safe shared publisher.
pub type SharedPublisher = Arc<Publisher>;

impl Publisher {
    pub fn new(config: PublisherConfig, stats: SharedRelayStats) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
            last_bpm: Mutex::new(None),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    /// Register a new subscriber.
    ///
    /// After [`disconnect_all`](Self::disconnect_all) the returned subscription
    /// is already at end-of-stream.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId::new();
        let (pulse_tx, pulse_rx) = mpsc::channel(self.config.pulse_queue_capacity.max(1));
        let (bpm_tx, bpm_rx) = mpsc::channel(self.config.bpm_queue_capacity.max(1));

        let subscription = Subscription {
            id,
            pulses: pulse_rx,
            bpm: bpm_rx,
            pulses_open: true,
            bpm_open: true,
        };

        let mut registry = self.registry.write();
        if self.closed.load(Ordering::Acquire) {
            return subscription;
        }
        registry.insert(
            id,
            Slot {
                pulses: pulse_tx,
                bpm: bpm_tx,
                pulse_misses: AtomicU32::new(0),
            },
        );
        drop(registry);

        self.stats.record_subscriber_connected();
        tracing::debug!(subscriber = %id, "Subscriber registered");
        subscription
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.registry.write().remove(&id).is_some();
        if removed {
            self.stats.record_subscriber_removed(false);
            tracing::debug!(subscriber = %id, "Subscriber unregistered");
        }
        removed
    }

    /// Deliver one event to every registered subscriber without blocking.
    pub fn publish(&self, event: TelemetryEvent) {
        if let TelemetryEvent::Bpm(bpm) = event {
            *self.last_bpm.lock() = Some(bpm);
        }

        let mut evicted = Vec::new();
        {
            let registry = self.registry.read();
            for (id, slot) in registry.iter() {
                let is_pulse = matches!(event, TelemetryEvent::Pulse(_));
                match slot.deliver(event) {
                    Delivery::Sent => {
                        if is_pulse {
                            slot.pulse_misses.store(0, Ordering::Relaxed);
                        }
                    }
                    Delivery::Full => {
                        self.stats.record_event_dropped();
                        if !is_pulse {
                            // A full bpm queue costs the update, never the registration.
                            continue;
                        }
                        let misses = slot.pulse_misses.fetch_add(1, Ordering::Relaxed) + 1;
                        if misses >= self.config.max_missed_events {
                            tracing::warn!(
                                subscriber = %id,
                                misses,
                                "Subscriber unresponsive, dropping"
                            );
                            evicted.push(*id);
                        }
                    }
                    Delivery::Gone => {
                        tracing::debug!(subscriber = %id, "Subscriber went away");
                        evicted.push(*id);
                    }
                }
            }
        }

        if !evicted.is_empty() {
            let mut registry = self.registry.write();
            for id in evicted {
                if registry.remove(&id).is_some() {
                    self.stats.record_subscriber_removed(true);
                }
            }
        }
    }

    /// Publish one raw sample as `pulseData`.
    pub fn publish_raw(&self, value: i32) {
        self.publish(TelemetryEvent::Pulse(value));
    }

    /// Publish one BPM value as `bpmData`.
    pub fn publish_bpm(&self, bpm: u32) {
        self.publish(TelemetryEvent::Bpm(bpm));
    }

    /// Drop every subscriber so consumers observe end-of-stream. Later
    /// subscriptions are closed immediately.
    pub fn disconnect_all(&self) -> usize {
        let mut registry = self.registry.write();
        self.closed.store(true, Ordering::Release);
        let count = registry.len();
        for _ in registry.drain() {
            self.stats.record_subscriber_removed(false);
        }
        if count > 0 {
            tracing::info!(count, "Disconnected all subscribers");
        }
        count
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.registry.read().contains_key(&id)
    }

    /// The most recently published BPM, if any window has closed yet.
    pub fn last_bpm(&self) -> Option<u32> {
        *self.last_bpm.lock()
    }
}

/// A subscriber's receiving end.
///
/// Dropping it is enough to leave: the publisher notices on its next publish.
pub struct Subscription {
    id: SubscriberId,
    pulses: mpsc::Receiver<i32>,
    bpm: mpsc::Receiver<u32>,
    pulses_open: bool,
    bpm_open: bool,
}

enum Next {
    Pulse(Option<i32>),
    Bpm(Option<u32>),
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event of either kind.
    ///
    /// Pending BPM updates are returned ahead of pending pulses. Returns `None`
    /// once the publisher has dropped this subscriber and both queues are drained.
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        loop {
            if !self.pulses_open && !self.bpm_open {
                return None;
            }

            let next = tokio::select! {
                biased;
                bpm = self.bpm.recv(), if self.bpm_open => Next::Bpm(bpm),
                pulse = self.pulses.recv(), if self.pulses_open => Next::Pulse(pulse),
            };

            match next {
                Next::Bpm(Some(bpm)) => return Some(TelemetryEvent::Bpm(bpm)),
                Next::Bpm(None) => self.bpm_open = false,
                Next::Pulse(Some(value)) => return Some(TelemetryEvent::Pulse(value)),
                Next::Pulse(None) => self.pulses_open = false,
            }
        }
    }

    /// Take the next queued `pulseData` value without waiting.
    pub fn try_recv_pulse(&mut self) -> Option<i32> {
        match self.pulses.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.pulses_open = false;
                None
            }
        }
    }

    /// Take the next queued `bpmData` value without waiting.
    pub fn try_recv_bpm(&mut self) -> Option<u32> {
        match self.bpm.try_recv() {
            Ok(bpm) => Some(bpm),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.bpm_open = false;
                None
            }
        }
    }

    /// Take everything currently queued, per kind, in publish order.
    pub fn drain(&mut self) -> (Vec<i32>, Vec<u32>) {
        let mut pulses = Vec::new();
        while let Some(value) = self.try_recv_pulse() {
            pulses.push(value);
        }
        let mut bpm = Vec::new();
        while let Some(value) = self.try_recv_bpm() {
            bpm.push(value);
        }
        (pulses, bpm)
    }

    /// True once the publisher has let go of this subscriber and a receive
    /// has observed it.
    pub fn is_closed(&self) -> bool {
        !self.pulses_open && !self.bpm_open
    }
}
