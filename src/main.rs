//! Pulse Relay CLI
//!
//! Live heart-rate telemetry from a pulse sensor.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pulse_relay::{
    config::Config,
    core::{BpmReading, Pipeline, Step},
    relay::{Relay, RelayExit, ReplayClock},
    source::{LineSource, SourceEvent, SourceInput},
    stats::create_shared_stats,
    telemetry::{Publisher, SharedPublisher},
    VERSION,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulse-relay")]
#[command(version = VERSION)]
#[command(about = "Pulse sensor relay: beat detection, BPM and live telemetry", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. debug, pulse_relay=trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay live samples to subscribers until Ctrl+C or end of input
    Start(StartArgs),

    /// Run a recorded capture through the pipeline and print beats and BPM
    Replay {
        /// Capture file, one sample per line (`-` for stdin)
        input: String,

        /// Sample rate of the capture, used to synthesize timestamps
        #[arg(long, default_value = "50")]
        sample_rate: f64,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: ReplayFormat,
    },

    /// Show configuration
    Config {
        /// Persist the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct StartArgs {
    /// Read samples from a file, or `-` for stdin
    #[arg(long, conflicts_with = "serial_port")]
    input: Option<String>,

    /// Read samples from a serial port (requires the `serial` feature)
    #[arg(long)]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    #[command(flatten)]
    tuning: TuningArgs,

    /// Subscriber endpoint port
    #[arg(long)]
    port: Option<u16>,

    /// Do not start the subscriber endpoint
    #[arg(long)]
    no_server: bool,
}

#[derive(Args)]
struct TuningArgs {
    /// Beat threshold (0-1023 scale)
    #[arg(long)]
    threshold: Option<i32>,

    /// BPM aggregation window in seconds
    #[arg(long)]
    window_secs: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReplayFormat {
    Text,
    Jsonl,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Start(args) => cmd_start(args),
        Commands::Replay {
            input,
            sample_rate,
            tuning,
            format,
        } => cmd_replay(&input, sample_rate, &tuning, format),
        Commands::Config { write } => cmd_config(write),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pulse_relay={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file and apply CLI overrides.
fn effective_config(tuning: &TuningArgs) -> anyhow::Result<Config> {
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not load config file, using defaults");
        Config::default()
    });
    if let Some(threshold) = tuning.threshold {
        config.threshold = threshold;
    }
    if let Some(secs) = tuning.window_secs {
        config.window_duration = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

fn cmd_start(args: StartArgs) -> anyhow::Result<()> {
    let mut config = effective_config(&args.tuning)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }

    let input = match (&args.input, args.serial_port.clone().or(config.serial.port.clone())) {
        (Some(path), _) => SourceInput::from_arg(path),
        (None, Some(port)) => SourceInput::Serial {
            port,
            baud_rate: config.serial.baud_rate,
        },
        (None, None) => SourceInput::Stdin,
    };

    println!("Pulse Relay v{VERSION}");
    println!();
    println!("  Input: {}", input.describe());
    println!("  Threshold: {}", config.threshold);
    println!("  Window duration: {}s", config.window_duration.as_secs());

    let stats = create_shared_stats();
    let publisher: SharedPublisher = Arc::new(Publisher::new(config.publisher, stats.clone()));

    // Subscriber endpoint runs on its own runtime; the pipeline stays on this thread.
    #[cfg(feature = "server")]
    let server = if args.no_server {
        println!("  Subscriber endpoint: disabled");
        None
    } else {
        let runtime = tokio::runtime::Runtime::new()?;
        let bind_address = config.server.bind_address.parse()?;
        let server_config = pulse_relay::server::ServerConfig::new(bind_address, config.server.port);
        let (addr, shutdown_tx) = runtime.block_on(pulse_relay::server::run(
            server_config,
            publisher.clone(),
            stats.clone(),
        ))?;
        println!("  Subscriber endpoint: ws://{addr}/ws");
        Some((runtime, shutdown_tx))
    };
    #[cfg(not(feature = "server"))]
    if !args.no_server {
        eprintln!("Warning: subscriber endpoint unavailable (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let source = LineSource::open(&input, config.source_queue_capacity)?;
    let pipeline = Pipeline::with_stats(config.pipeline(), Utc::now(), stats.clone());
    let mut relay = Relay::new(source, pipeline, publisher);

    match relay.run(&running, Utc::now, report_bpm)? {
        RelayExit::Stopped => {}
        RelayExit::InputEnded => println!("Input ended"),
        RelayExit::InputFailed(e) => eprintln!("Input failed: {e}"),
    }

    // Shutdown order: reader, partial window, subscribers, endpoint.
    println!();
    println!("Stopping relay...");
    let partial = relay.shutdown(Utc::now());
    if partial.beats > 0 {
        println!(
            "Discarded partial window ({} beats since {})",
            partial.beats,
            partial.window_start.format("%H:%M:%S")
        );
    }

    #[cfg(feature = "server")]
    if let Some((runtime, shutdown_tx)) = server {
        let _ = shutdown_tx.send(());
        runtime.shutdown_timeout(Duration::from_secs(2));
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn report_bpm(reading: &BpmReading) {
    println!(
        "[{}] BPM: {} ({} beats)",
        reading.window_end.format("%H:%M:%S"),
        reading.bpm,
        reading.beats
    );
}

/// One line of `replay --format jsonl` output.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayRecord {
    Beat {
        seq: u64,
        value: i32,
        t_ms: i64,
    },
    Bpm {
        bpm: u32,
        beats: u32,
        window_start_ms: i64,
        window_end_ms: i64,
    },
}

fn cmd_replay(
    input: &str,
    sample_rate: f64,
    tuning: &TuningArgs,
    format: ReplayFormat,
) -> anyhow::Result<()> {
    // Synthetic clock: line n arrives at n / sample_rate seconds after the epoch.
    let clock = ReplayClock::new(DateTime::<Utc>::default(), sample_rate).ok_or_else(|| {
        anyhow::anyhow!("--sample-rate must be positive with a period of at least 1 microsecond")
    })?;
    let at = |n: i64| {
        clock.at(n).ok_or_else(|| {
            anyhow::anyhow!("capture is too long to timestamp at {sample_rate} Hz")
        })
    };
    let config = effective_config(tuning)?;

    let mut source = LineSource::open(&SourceInput::from_arg(input), config.source_queue_capacity)?;
    source.start()?;

    let origin = clock.origin();
    let mut pipeline = Pipeline::new(config.pipeline(), origin);
    let mut line_no: i64 = 0;

    loop {
        match source.receiver().recv() {
            Ok(SourceEvent::Line(line)) => {
                let now = at(line_no)?;
                line_no += 1;
                if let Some(step) = pipeline.process_line(&line, now) {
                    print_step(&step, origin, format)?;
                }
            }
            Ok(SourceEvent::Closed) => break,
            Ok(SourceEvent::Failed(e)) => anyhow::bail!("input failed: {e}"),
            Err(_) => break,
        }
    }
    source.stop();

    let partial = pipeline.shutdown(at(line_no)?);
    if let ReplayFormat::Text = format {
        let stats = pipeline.stats().snapshot();
        println!();
        println!(
            "{} samples, {} malformed lines, {} beats, {} windows",
            stats.samples_accepted, stats.lines_rejected, stats.beats_detected, stats.windows_completed
        );
        if partial.beats > 0 {
            println!("Partial final window discarded ({} beats)", partial.beats);
        }
    }
    Ok(())
}

fn print_step(step: &Step, origin: DateTime<Utc>, format: ReplayFormat) -> anyhow::Result<()> {
    let offset_ms = |t: DateTime<Utc>| (t - origin).num_milliseconds();

    if let Some(beat) = step.beat {
        match format {
            ReplayFormat::Text => println!(
                "{:>9.3}s  beat  #{} value={}",
                offset_ms(step.sample.received_at) as f64 / 1000.0,
                beat.seq,
                step.sample.value
            ),
            ReplayFormat::Jsonl => println!(
                "{}",
                serde_json::to_string(&ReplayRecord::Beat {
                    seq: beat.seq,
                    value: step.sample.value,
                    t_ms: offset_ms(step.sample.received_at),
                })?
            ),
        }
    }

    if let Some(reading) = step.reading {
        match format {
            ReplayFormat::Text => println!(
                "{:>9.3}s  bpm   {} ({} beats)",
                offset_ms(reading.window_end) as f64 / 1000.0,
                reading.bpm,
                reading.beats
            ),
            ReplayFormat::Jsonl => println!(
                "{}",
                serde_json::to_string(&ReplayRecord::Bpm {
                    bpm: reading.bpm,
                    beats: reading.beats,
                    window_start_ms: offset_ms(reading.window_start),
                    window_end_ms: offset_ms(reading.window_end),
                })?
            ),
        }
    }
    Ok(())
}

fn cmd_config(write: bool) -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if write {
        config.save()?;
        println!();
        println!("Saved to {:?}", Config::config_path());
    }
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })?;
    Ok(())
}
