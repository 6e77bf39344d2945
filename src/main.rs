//! ExamPulse Telemetry CLI
//!
//! Replays recorded interaction events through a live tracking session and
//! runs the local reference collector.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use exampulse_telemetry::{
    create_shared_stats, DeliveryChannel, HttpFallback, RawEvent, StreamingTransport,
    TcpStreamTransport, TelemetryConfig, TrackingSession, PRIVACY_DECLARATION, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "exampulse-telemetry")]
#[command(author = "ExamPulse")]
#[command(version = VERSION)]
#[command(about = "Behavioral telemetry pipeline for proctored exam sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSONL recording of raw events through a tracking session
    Replay {
        /// Recording with one raw event per line
        file: PathBuf,

        /// User identifier for the session
        #[arg(long)]
        user: String,

        /// Exam identifier for the session
        #[arg(long)]
        exam: String,

        /// Playback speed multiplier
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Collector base URL (overrides the config file)
        #[arg(long)]
        collector_url: Option<String>,

        /// Streaming address host:port (overrides the config file)
        #[arg(long)]
        stream_addr: Option<String>,
    },

    /// Run the local reference collector
    #[cfg(feature = "server")]
    Collector {
        /// HTTP port
        #[arg(long, default_value = "5000")]
        port: u16,

        /// Streaming port
        #[arg(long, default_value = "5001")]
        stream_port: u16,
    },

    /// Show configuration
    Config {
        /// Write the default configuration to the config file
        #[arg(long)]
        init: bool,
    },

    /// Display the capture declaration
    Privacy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exampulse_telemetry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            file,
            user,
            exam,
            speed,
            collector_url,
            stream_addr,
        } => cmd_replay(&file, user, exam, speed, collector_url, stream_addr).await,
        #[cfg(feature = "server")]
        Commands::Collector { port, stream_port } => cmd_collector(port, stream_port).await,
        Commands::Config { init } => cmd_config(init),
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
    }
}

async fn cmd_replay(
    file: &Path,
    user: String,
    exam: String,
    speed: f64,
    collector_url: Option<String>,
    stream_addr: Option<String>,
) -> anyhow::Result<()> {
    if !(speed > 0.0) {
        bail!("--speed must be positive");
    }

    let mut config = TelemetryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load config, using defaults");
        TelemetryConfig::default()
    });
    if let Some(url) = collector_url {
        config.collector.base_url = url;
    }
    if stream_addr.is_some() {
        config.collector.stream_addr = stream_addr;
    }

    let events = read_recording(file)?;
    println!("ExamPulse Telemetry v{VERSION}");
    println!("Replaying {} events from {:?}", events.len(), file);
    println!("  Collector: {}", config.collector.fallback_url());
    if let Some(addr) = &config.collector.stream_addr {
        println!("  Stream: {addr}");
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = CancellationToken::new();
    ctrlc_handler(cancel.clone())?;

    let stats = create_shared_stats();
    let fallback = HttpFallback::new(&config.collector)?;
    match fallback.test_connection().await {
        Ok(true) => println!("Collector connection: OK"),
        Ok(false) => eprintln!("Warning: Collector health check failed"),
        Err(e) => eprintln!("Warning: Could not reach collector: {e}"),
    }

    let stream = config.collector.stream_addr.as_ref().map(|addr| {
        let transport = TcpStreamTransport::new(addr.clone(), config.reconnect);
        transport.spawn_supervisor(cancel.child_token());
        Arc::new(transport) as Arc<dyn StreamingTransport>
    });

    let delivery = DeliveryChannel::new(stream, Arc::new(fallback), config.ack_timeout, stats.clone());
    let flush_wait = config.emission_period + config.ack_timeout;

    let mut session = TrackingSession::new(config, delivery, stats.clone());
    let sink = session.start(user, exam)?;

    let mut previous = events.first().map(|e| e.timestamp);
    for event in &events {
        if let Some(prev) = previous {
            let gap = (event.timestamp - prev).to_std().unwrap_or(Duration::ZERO);
            let wait = playback_delay(gap, speed)?;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        previous = Some(event.timestamp);
        sink.emit(event.kind, event.payload);
    }

    if !cancel.is_cancelled() {
        // Let the last tick fire and its deliveries settle
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(flush_wait) => {}
        }
    }

    session.stop();
    cancel.cancel();

    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Recorded gap scaled by the playback speed.
fn playback_delay(gap: Duration, speed: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed)
        .with_context(|| format!("--speed {speed} stretches a {gap:?} gap beyond the maximum delay"))
}

/// Read one raw event per non-empty line.
fn read_recording(path: &Path) -> anyhow::Result<Vec<RawEvent>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<RawEvent>(line)
                .with_context(|| format!("invalid event on line {}", index + 1))
        })
        .collect()
}

#[cfg(feature = "server")]
async fn cmd_collector(port: u16, stream_port: u16) -> anyhow::Result<()> {
    use exampulse_telemetry::server::{run, ServerConfig};

    let cancel = CancellationToken::new();
    ctrlc_handler(cancel.clone())?;

    let collector = run(ServerConfig::new(port, Some(stream_port))).await?;
    println!("Collector listening on http://{}", collector.http_addr);
    if let Some(addr) = collector.stream_addr {
        println!("Streaming on {addr}");
    }
    println!("Press Ctrl+C to stop");

    cancel.cancelled().await;
    println!();
    println!("Received {} packets", collector.state.total().await);
    collector.shutdown();
    Ok(())
}

fn cmd_config(init: bool) -> anyhow::Result<()> {
    let config = if init {
        let config = TelemetryConfig::default();
        config.save()?;
        println!("Wrote default configuration");
        config
    } else {
        TelemetryConfig::load()?
    };

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", TelemetryConfig::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || cancel.cancel()).context("Error setting Ctrl+C handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_delay_scales_gaps() {
        let gap = Duration::from_millis(1_000);
        assert_eq!(playback_delay(gap, 2.0).unwrap(), Duration::from_millis(500));
        assert_eq!(playback_delay(Duration::ZERO, 1e-20).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_tiny_speed_is_an_error() {
        assert!(playback_delay(Duration::from_millis(1_000), 1e-20).is_err());
    }
}
