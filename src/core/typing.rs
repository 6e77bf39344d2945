//! Typing activity state machine.
//!
//! Tracks keystroke cadence for one exam session and reports words per minute
//! over a trailing window. The machine goes `Active` on any character-producing
//! keystroke and falls back to `Idle` on the first tick that observes the idle
//! timeout; there is no separate idle timer.

use crate::collector::types::{EventPayload, RawEvent, RawEventKind};
use crate::core::features::words_per_minute;
use crate::core::windowing::WindowedMetricSeries;
use crate::session::SessionContext;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Typing activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingState {
    Idle,
    Active,
}

/// One typing-speed observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingSample {
    pub typing_speed_wpm: f64,
    /// Length of the trailing window the speed was measured over
    pub sample_window_ms: u64,
    /// Keystroke entries currently buffered
    pub buffer_size: usize,
}

/// Timing parameters for the typing tracker.
#[derive(Debug, Clone, Copy)]
pub struct TypingConfig {
    pub idle_timeout: Duration,
    /// Trailing window for WPM
    pub window: Duration,
    /// How long keystroke entries are buffered
    pub retention: Duration,
    pub chars_per_word: f64,
}

/// Keystroke-cadence tracker with explicit session lifecycle.
#[derive(Debug, Clone)]
pub struct TypingStateMachine {
    config: TypingConfig,
    state: TypingState,
    last_keystroke_at: Option<DateTime<Utc>>,
    char_buffer: WindowedMetricSeries,
    context: SessionContext,
}

impl TypingStateMachine {
    pub fn new(config: TypingConfig) -> Self {
        Self {
            config,
            state: TypingState::Idle,
            last_keystroke_at: None,
            char_buffer: WindowedMetricSeries::new(config.retention),
            context: SessionContext::cleared(),
        }
    }

    /// Begin tracking for a session, discarding anything buffered before.
    pub fn start(&mut self, user_id: impl Into<String>, exam_id: impl Into<String>) {
        self.reset();
        self.context = SessionContext::new(user_id, exam_id);
        debug!(user_id = %self.context.user_id, exam_id = %self.context.exam_id, "typing tracker started");
    }

    /// End the session: buffers and identifiers are cleared.
    pub fn stop(&mut self) {
        self.reset();
        if self.context.is_emitting() {
            debug!("typing tracker stopped");
        }
        self.context = SessionContext::cleared();
    }

    /// Record `count` typed characters at `timestamp`.
    pub fn record_keystroke(&mut self, count: u32, timestamp: DateTime<Utc>) {
        if !self.context.is_emitting() {
            return;
        }
        self.char_buffer.record(f64::from(count), timestamp);
        self.last_keystroke_at = Some(timestamp);
        self.state = TypingState::Active;
    }

    /// Feed a raw event; only character-producing key presses count.
    pub fn observe(&mut self, event: &RawEvent) {
        if let (RawEventKind::KeyDown, EventPayload::Key { class }) = (event.kind, event.payload) {
            if class.produces_character() {
                self.record_keystroke(1, event.timestamp);
            }
        }
    }

    /// Advance the machine to `now` and produce a sample while active.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<TypingSample> {
        if !self.context.is_emitting() {
            return None;
        }
        self.char_buffer.prune(now);

        if self.state == TypingState::Active && self.idle_elapsed(now) {
            debug!("typing idle");
            self.state = TypingState::Idle;
        }
        if self.state == TypingState::Idle {
            return None;
        }

        Some(TypingSample {
            typing_speed_wpm: self.words_per_minute(now),
            sample_window_ms: self.config.window.num_milliseconds().max(0) as u64,
            buffer_size: self.char_buffer.len(),
        })
    }

    /// WPM over the trailing window ending at `now`, rounded to two decimals.
    pub fn words_per_minute(&self, now: DateTime<Utc>) -> f64 {
        let characters = self.char_buffer.sum_since(now - self.config.window);
        let window_ms = self.config.window.num_milliseconds() as f64;
        let wpm = words_per_minute(characters, window_ms, self.config.chars_per_word);
        (wpm * 100.0).round() / 100.0
    }

    pub fn state(&self) -> TypingState {
        self.state
    }

    pub fn last_keystroke_at(&self) -> Option<DateTime<Utc>> {
        self.last_keystroke_at
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn buffered(&self) -> usize {
        self.char_buffer.len()
    }

    fn idle_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.last_keystroke_at
            .map_or(true, |last| now - last >= self.config.idle_timeout)
    }

    fn reset(&mut self) {
        self.char_buffer.clear();
        self.last_keystroke_at = None;
        self.state = TypingState::Idle;
    }
}
