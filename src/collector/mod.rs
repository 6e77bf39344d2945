//! Event collection module for ExamPulse Telemetry.
//!
//! This module normalizes pointer, keyboard, focus, clipboard and exam-progress
//! notifications into timestamped raw events.

pub mod observer;
pub mod types;

// Re-export commonly used types
pub use observer::{EventSink, Observer, DEFAULT_CHANNEL_CAPACITY};
pub use types::{EventPayload, KeyClass, RawEvent, RawEventKind, Signal};
