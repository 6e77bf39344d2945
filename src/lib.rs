//! ExamPulse Telemetry - behavioral feature pipeline for proctored exam sessions.
//!
//! This library observes raw interaction signals during an exam attempt, reduces
//! them into statistical feature packets on a fixed cadence, and delivers those
//! packets to a remote collector.
//!
//! # Capture Guarantees
//!
//! - **No key content**: keystrokes are reduced to a coarse class (printable,
//!   whitespace, backspace, other) before they leave the observer
//! - **No raw storage**: raw events live only in rolling in-memory buffers
//! - **No verdicts**: the pipeline produces features, never risk scores
//! - **Transparency**: every captured and delivered item is counted
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ExamPulse Telemetry                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌────────────┐   │
//! │  │ Observer │──▶│ Windowing  │──▶│ Features │──▶│ Scheduler  │   │
//! │  │  (sink)  │   │ (15s bufs) │   │ + Typing │   │ (3s ticks) │   │
//! │  └──────────┘   └────────────┘   └──────────┘   └─────┬──────┘   │
//! │                                                       ▼          │
//! │                                   ┌─────────────────────────┐    │
//! │                                   │ Delivery: stream + ack, │    │
//! │                                   │   HTTP fallback         │    │
//! │                                   └─────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exampulse_telemetry::{
//!     create_shared_stats, DeliveryChannel, HttpFallback, TelemetryConfig, TrackingSession,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TelemetryConfig::default();
//! let stats = create_shared_stats();
//! let fallback = HttpFallback::new(&config.collector)?;
//! let delivery = DeliveryChannel::new(None, Arc::new(fallback), config.ack_timeout, stats.clone());
//!
//! let mut session = TrackingSession::new(config, delivery, stats);
//! let sink = session.start("student-42", "exam-7")?;
//! sink.key_pressed("a");
//! // ...
//! session.stop();
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod collector;
pub mod config;
pub mod core;
pub mod delivery;
pub mod scheduler;
pub mod session;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use clock::SessionClock;
pub use collector::{EventSink, KeyClass, Observer, RawEvent, RawEventKind};
pub use config::{CollectorEndpoint, ConfigError, ReconnectPolicy, TelemetryConfig};
pub use core::{
    compute_features, BehaviorFeatures, FeaturePacket, PacketBody, TypingSample, TypingState,
    TypingStateMachine, WindowedAggregator, WindowedMetricSeries,
};
pub use delivery::{
    DeliveryAck, DeliveryChannel, DeliveryError, DeliveryRoute, EventType, FallbackTransport,
    HttpFallback, OutboundMessage, StreamingTransport, TcpStreamTransport,
};
pub use scheduler::{EmissionScheduler, SchedulerHandle, TickHandler};
pub use session::{SessionContext, SessionError, SessionPipeline, TrackingSession};
pub use transparency::{create_shared_stats, SharedTelemetryStats, TelemetryStats, TelemetrySnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capture declaration that can be displayed to exam candidates.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║            EXAMPULSE TELEMETRY - CAPTURE DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  During this exam, interaction timing is measured.               ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • How fast and how steadily the pointer moves                 ║
║    • Typing rhythm and speed (never the text typed)              ║
║    • When the exam window loses or regains focus                 ║
║    • How often copy, paste and backspace are used                ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Which keys you press or what you write                      ║
║    • Screen content or other applications                        ║
║    • Anything after the exam session ends                        ║
║                                                                  ║
║  Raw signals stay in memory for at most the feature window       ║
║  (15 seconds). Only statistical summaries are sent.              ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
