//! Transparency module for ExamPulse Telemetry.
//!
//! This module counts what the pipeline captured and delivered, so a candidate
//! or operator can see exactly how much was observed without any raw content.

pub mod stats;

// Re-export commonly used types
pub use stats::{create_shared_stats, SharedTelemetryStats, TelemetrySnapshot, TelemetryStats};
