//! The live processing loop.
//!
//! [`Relay`] owns the sample source and the pipeline and hands everything the
//! pipeline produces to the publisher. Each wait on the source channel is
//! bounded by the time left in the current window, so windows close on
//! schedule whether the input is silent, healthy, or sending garbage.

use crate::core::{BpmReading, PartialWindow, Pipeline};
use crate::source::{LineSource, SourceError, SourceEvent};
use crate::telemetry::SharedPublisher;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest single wait, so a cleared `running` flag is noticed promptly.
pub const STOP_POLL: Duration = Duration::from_millis(200);

/// Why [`Relay::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// The `running` flag was cleared
    Stopped,
    /// The input reached end-of-stream
    InputEnded,
    /// The input failed and no more lines will arrive
    InputFailed(String),
}

/// Source, pipeline and publisher wired together for one live session.
pub struct Relay {
    source: LineSource,
    pipeline: Pipeline,
    publisher: SharedPublisher,
}

impl Relay {
    pub fn new(source: LineSource, pipeline: Pipeline, publisher: SharedPublisher) -> Self {
        Self {
            source,
            pipeline,
            publisher,
        }
    }

    /// Start the source and process lines until `running` is cleared or the
    /// input ends. `on_reading` sees every BPM reading once it is published.
    pub fn run<C, F>(
        &mut self,
        running: &AtomicBool,
        clock: C,
        mut on_reading: F,
    ) -> Result<RelayExit, SourceError>
    where
        C: Fn() -> DateTime<Utc>,
        F: FnMut(&BpmReading),
    {
        self.source.start()?;
        tracing::info!(
            source = %self.source.description(),
            threshold = self.pipeline.detector().threshold(),
            "Relay running"
        );
        let receiver = self.source.receiver().clone();

        while running.load(Ordering::SeqCst) {
            let now = clock();
            if let Some(reading) = self.pipeline.tick(now) {
                self.publisher.publish_bpm(reading.bpm);
                on_reading(&reading);
            }

            let wait = self.pipeline.time_until_window_close(now).min(STOP_POLL);
            match receiver.recv_timeout(wait) {
                Ok(SourceEvent::Line(line)) => {
                    if let Some(step) = self.pipeline.process_line(&line, clock()) {
                        for event in step.events() {
                            self.publisher.publish(event);
                        }
                        if let Some(reading) = step.reading {
                            on_reading(&reading);
                        }
                    }
                }
                Ok(SourceEvent::Closed) => {
                    tracing::info!("Input ended");
                    return Ok(RelayExit::InputEnded);
                }
                Ok(SourceEvent::Failed(e)) => {
                    tracing::warn!(error = %e, "Input failed");
                    return Ok(RelayExit::InputFailed(e));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Sample source disconnected unexpectedly");
                    return Ok(RelayExit::InputEnded);
                }
            }
        }

        Ok(RelayExit::Stopped)
    }

    /// Stop the reader, discard the partial window, then disconnect every
    /// subscriber. Stopping an HTTP endpoint is left to the caller, after this.
    pub fn shutdown(&mut self, now: DateTime<Utc>) -> PartialWindow {
        self.source.stop();
        let partial = self.pipeline.shutdown(now);
        let disconnected = self.publisher.disconnect_all();
        tracing::info!(
            discarded_beats = partial.beats,
            disconnected,
            "Relay stopped"
        );
        partial
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

/// Timestamps for a recorded capture: line `n` arrives `n / sample_rate`
/// seconds after `origin`.
#[derive(Debug, Clone, Copy)]
pub struct ReplayClock {
    origin: DateTime<Utc>,
    period_us: i64,
}

impl ReplayClock {
    /// `None` unless the rate is positive and its period is a whole number of
    /// microseconds that fits in an `i64`.
    pub fn new(origin: DateTime<Utc>, sample_rate: f64) -> Option<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return None;
        }
        let period = (1_000_000.0 / sample_rate).round();
        if !(1.0..i64::MAX as f64).contains(&period) {
            return None;
        }
        Some(Self {
            origin,
            period_us: period as i64,
        })
    }

    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    /// Arrival time of line `n`, or `None` past the representable range.
    pub fn at(&self, n: i64) -> Option<DateTime<Utc>> {
        let micros = self.period_us.checked_mul(n)?;
        self.origin
            .checked_add_signed(ChronoDuration::microseconds(micros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineConfig;
    use crate::stats::create_shared_stats;
    use crate::telemetry::{Publisher, PublisherConfig, Subscription};
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Instant;

    /// Input that blocks until the test feeds it bytes; EOF once the feeder is dropped.
    struct Feed {
        chunks: Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for Feed {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.chunks.recv() {
                    Ok(bytes) => self.pending = bytes,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending = self.pending.split_off(n);
            Ok(n)
        }
    }

    /// Input that produces a malformed line every 10ms, forever.
    struct Noise;

    impl Read for Noise {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(10));
            let line = b"noise\n";
            let n = buf.len().min(line.len());
            buf[..n].copy_from_slice(&line[..n]);
            Ok(n)
        }
    }

    fn feed() -> (Sender<Vec<u8>>, Feed) {
        let (tx, rx) = unbounded();
        (
            tx,
            Feed {
                chunks: rx,
                pending: Vec::new(),
            },
        )
    }

    fn relay(input: Box<dyn Read + Send>, window: Duration) -> (Relay, Subscription) {
        let stats = create_shared_stats();
        let publisher = Arc::new(Publisher::new(PublisherConfig::default(), stats.clone()));
        let subscription = publisher.subscribe();
        let pipeline = Pipeline::with_stats(
            PipelineConfig {
                threshold: 850,
                window,
            },
            Utc::now(),
            stats,
        );
        let source = LineSource::from_reader(input, "test input".to_string(), 16);
        (Relay::new(source, pipeline, publisher), subscription)
    }

    fn spawn(
        mut relay: Relay,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<(Relay, Result<RelayExit, SourceError>)> {
        std::thread::spawn(move || {
            let exit = relay.run(&running, Utc::now, |_| {});
            (relay, exit)
        })
    }

    /// Poll the subscription until `count` BPM values have arrived.
    fn wait_for_bpm(sub: &mut Subscription, count: usize) -> Vec<u32> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < count {
            assert!(Instant::now() < deadline, "only saw BPM values {seen:?}");
            match sub.try_recv_bpm() {
                Some(bpm) => seen.push(bpm),
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        seen
    }

    #[test]
    fn test_quiet_input_still_reports_zero_bpm() {
        let (feeder, input) = feed();
        let (relay, mut sub) = relay(Box::new(input), Duration::from_millis(150));
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(relay, running.clone());

        assert_eq!(wait_for_bpm(&mut sub, 2), vec![0, 0]);

        running.store(false, Ordering::SeqCst);
        let (mut relay, exit) = handle.join().unwrap();
        assert_eq!(exit.unwrap(), RelayExit::Stopped);
        assert!(relay.pipeline().stats().snapshot().windows_completed >= 2);

        relay.shutdown(Utc::now());
        drop(feeder);
    }

    #[test]
    fn test_malformed_flood_does_not_hold_windows_open() {
        let (relay, mut sub) = relay(Box::new(Noise), Duration::from_millis(150));
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(relay, running.clone());

        assert_eq!(wait_for_bpm(&mut sub, 2), vec![0, 0]);
        assert_eq!(sub.try_recv_pulse(), None);

        running.store(false, Ordering::SeqCst);
        let (mut relay, _) = handle.join().unwrap();
        assert!(relay.pipeline().stats().snapshot().lines_rejected > 0);
        relay.shutdown(Utc::now());
    }

    #[test]
    fn test_shutdown_discards_partial_window_then_disconnects() {
        let (feeder, input) = feed();
        let (relay, mut sub) = relay(Box::new(input), Duration::from_secs(60));
        let publisher = relay.publisher.clone();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(relay, running.clone());

        feeder.send(b"900\n400\n900\n".to_vec()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut pulses = Vec::new();
        while pulses.len() < 3 {
            assert!(Instant::now() < deadline, "only saw pulses {pulses:?}");
            match sub.try_recv_pulse() {
                Some(value) => pulses.push(value),
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        assert_eq!(pulses, vec![900, 400, 900]);

        running.store(false, Ordering::SeqCst);
        let (mut relay, exit) = handle.join().unwrap();
        assert_eq!(exit.unwrap(), RelayExit::Stopped);

        let partial = relay.shutdown(Utc::now());
        assert_eq!(partial.beats, 2);

        // The partial window was never published and the stream has ended.
        assert_eq!(sub.drain(), (vec![], vec![]));
        assert!(sub.is_closed());
        assert_eq!(publisher.last_bpm(), None);
        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(relay.pipeline().stats().snapshot().windows_completed, 0);

        drop(feeder);
    }

    #[test]
    fn test_end_of_input_stops_the_loop() {
        let input = Cursor::new(b"800\n900\nabc\n".to_vec());
        let (mut relay, mut sub) = relay(Box::new(input), Duration::from_secs(60));
        let running = AtomicBool::new(true);

        let mut readings = 0;
        let exit = relay.run(&running, Utc::now, |_| readings += 1).unwrap();

        assert_eq!(exit, RelayExit::InputEnded);
        assert_eq!(readings, 0);
        assert_eq!(sub.drain().0, vec![800, 900]);
        assert_eq!(relay.pipeline().stats().snapshot().lines_rejected, 1);
    }

    #[test]
    fn test_source_can_only_run_once() {
        let (mut relay, _sub) = relay(Box::new(Cursor::new(Vec::new())), Duration::from_secs(5));
        let running = AtomicBool::new(true);
        assert_eq!(
            relay.run(&running, Utc::now, |_| {}).unwrap(),
            RelayExit::InputEnded
        );
        assert!(matches!(
            relay.run(&running, Utc::now, |_| {}),
            Err(SourceError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_replay_clock_spacing() {
        let origin = DateTime::<Utc>::default();
        let clock = ReplayClock::new(origin, 50.0).unwrap();
        assert_eq!(clock.at(0), Some(origin));
        assert_eq!(clock.at(3), Some(origin + ChronoDuration::milliseconds(60)));
    }

    #[test]
    fn test_replay_clock_rejects_unusable_rates() {
        let origin = DateTime::<Utc>::default();
        assert!(ReplayClock::new(origin, 0.0).is_none());
        assert!(ReplayClock::new(origin, -5.0).is_none());
        assert!(ReplayClock::new(origin, f64::NAN).is_none());
        assert!(ReplayClock::new(origin, f64::INFINITY).is_none());
        // Period rounds to zero microseconds.
        assert!(ReplayClock::new(origin, 5e6).is_none());
        // Period does not fit in an i64.
        assert!(ReplayClock::new(origin, 1e-13).is_none());
    }

    #[test]
    fn test_replay_clock_overflow_is_none() {
        let origin = DateTime::<Utc>::default();
        let clock = ReplayClock::new(origin, 1e-12).unwrap();
        assert!(clock.at(1).is_some());
        assert_eq!(clock.at(100), None);
        assert_eq!(clock.at(i64::MAX), None);
    }
}
