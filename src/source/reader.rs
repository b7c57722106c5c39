//! Line reader that feeds the processing loop.
//!
//! A dedicated thread pulls newline-delimited text from the input and hands
//! each line over a bounded channel. The thread is the only place that blocks
//! on I/O; the processing loop only waits on the channel.

use crate::source::types::{SourceError, SourceEvent, SourceInput};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a full channel may block the reader before it re-checks for stop.
const SEND_RETRY: Duration = Duration::from_millis(100);

type BoxedInput = Box<dyn Read + Send>;

/// A sample source backed by any byte stream.
pub struct LineSource {
    input: Option<BoxedInput>,
    description: String,
    sender: Sender<SourceEvent>,
    receiver: Receiver<SourceEvent>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LineSource {
    /// Open the configured input. Nothing is read until [`start`](Self::start).
    pub fn open(input: &SourceInput, capacity: usize) -> Result<Self, SourceError> {
        let reader: BoxedInput = match input {
            SourceInput::Stdin => Box::new(std::io::stdin()),
            SourceInput::File(path) => Box::new(
                std::fs::File::open(path)
                    .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?,
            ),
            SourceInput::Serial { port, baud_rate } => open_serial(port, *baud_rate)?,
        };
        Ok(Self::from_reader(reader, input.describe(), capacity))
    }

    /// Wrap an already-open reader.
    pub fn from_reader(reader: BoxedInput, description: String, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            input: Some(reader),
            description,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the reader thread. A source can only be started once.
    pub fn start(&mut self) -> Result<(), SourceError> {
        let input = self.input.take().ok_or(SourceError::AlreadyRunning)?;

        self.running.store(true, Ordering::SeqCst);
        let sender = self.sender.clone();
        let running = self.running.clone();
        let description = self.description.clone();

        let handle = std::thread::Builder::new()
            .name("pulse-source".to_string())
            .spawn(move || {
                tracing::info!(source = %description, "Sample source started");
                pump_lines(BufReader::new(input), &sender, &running);
                running.store(false, Ordering::SeqCst);
                tracing::debug!(source = %description, "Sample source reader exited");
            })
            .map_err(|e| SourceError::Io(e.to_string()))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the reader to stop. A read already blocked on a quiet input
    /// (e.g. an idle terminal) finishes only when that read returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    /// Get the receiver for source events.
    pub fn receiver(&self) -> &Receiver<SourceEvent> {
        &self.receiver
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Read lines until end-of-stream, a hard error, or `running` is cleared.
///
/// Read timeouts (serial ports) keep any partial line and simply retry.
/// Bytes that are not valid UTF-8 are passed through lossily so the pipeline
/// rejects the line like any other malformed input.
pub fn pump_lines<R: BufRead>(mut reader: R, sender: &Sender<SourceEvent>, running: &AtomicBool) {
    let mut buf = Vec::new();

    while running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                if !buf.is_empty() {
                    let line = take_line(&mut buf);
                    if !send(sender, SourceEvent::Line(line), running) {
                        return;
                    }
                }
                tracing::info!("Sample source reached end of input");
                send(sender, SourceEvent::Closed, running);
                return;
            }
            Ok(_) => {
                if buf.last() != Some(&b'\n') {
                    // Final line without a trailing newline; next read reports EOF.
                    continue;
                }
                let line = take_line(&mut buf);
                if !send(sender, SourceEvent::Line(line), running) {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!(error = %e, "Sample source read failed");
                send(sender, SourceEvent::Failed(e.to_string()), running);
                return;
            }
        }
    }
}

fn take_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(&buf[..])
        .trim_end_matches(|c: char| c == '\n' || c == '\r')
        .to_string();
    buf.clear();
    line
}

/// Send with a bounded wait so a stopped consumer never strands the reader.
fn send(sender: &Sender<SourceEvent>, mut event: SourceEvent, running: &AtomicBool) -> bool {
    loop {
        match sender.send_timeout(event, SEND_RETRY) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if !running.load(Ordering::SeqCst) {
                    return false;
                }
                event = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(port: &str, baud_rate: u32) -> Result<BoxedInput, SourceError> {
    crate::source::serial::open(port, baud_rate)
}

#[cfg(not(feature = "serial"))]
fn open_serial(_port: &str, _baud_rate: u32) -> Result<BoxedInput, SourceError> {
    Err(SourceError::SerialUnsupported)
}
