//! Core functionality for ExamPulse Telemetry.
//!
//! This module contains:
//! - Rolling windows over raw interaction signals
//! - Behavior feature computation from those windows
//! - The typing activity state machine
//! - Feature packets handed to delivery

pub mod features;
pub mod packet;
pub mod typing;
pub mod windowing;

// Re-export commonly used types
pub use features::{compute_features, BehaviorFeatures, DEFAULT_CHARS_PER_WORD};
pub use packet::{FeaturePacket, PacketBody};
pub use typing::{TypingConfig, TypingSample, TypingState, TypingStateMachine};
pub use windowing::{FocusChange, Sample, Series, SessionCounters, WindowedAggregator, WindowedMetricSeries};
