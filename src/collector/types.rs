//! Raw event types produced by the observer.
//!
//! Keystrokes are reduced to a coarse [`KeyClass`] at the edge, so the actual
//! characters typed never enter the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a raw interaction notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    PointerMove,
    KeyDown,
    FocusLost,
    FocusGained,
    Copy,
    Paste,
    /// The candidate moved on to the next question
    QuestionAdvanced,
    /// The candidate changed a previously given answer
    AnswerChanged,
}

impl RawEventKind {
    /// The signal group whose handler produces this kind of event.
    pub fn signal(self) -> Signal {
        match self {
            RawEventKind::PointerMove => Signal::Pointer,
            RawEventKind::KeyDown => Signal::Keyboard,
            RawEventKind::FocusLost | RawEventKind::FocusGained => Signal::Focus,
            RawEventKind::Copy | RawEventKind::Paste => Signal::Clipboard,
            RawEventKind::QuestionAdvanced | RawEventKind::AnswerChanged => Signal::Progress,
        }
    }
}

/// Signal groups the observer registers one handler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Pointer,
    Keyboard,
    Focus,
    Clipboard,
    Progress,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::Pointer,
        Signal::Keyboard,
        Signal::Focus,
        Signal::Clipboard,
        Signal::Progress,
    ];
}

/// Coarse classification of a pressed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyClass {
    /// A key producing a visible character
    Printable,
    /// Space or Enter
    Whitespace,
    Backspace,
    /// Modifiers, arrows, function keys and the like
    Other,
}

impl KeyClass {
    /// Classify a key by its DOM-style key name (`"a"`, `" "`, `"Enter"`, `"Backspace"`...).
    pub fn from_key_name(key: &str) -> Self {
        match key {
            " " | "Enter" => KeyClass::Whitespace,
            "Backspace" => KeyClass::Backspace,
            k if k.chars().count() == 1 => KeyClass::Printable,
            _ => KeyClass::Other,
        }
    }

    /// Whether the key adds a character to the typed text.
    pub fn produces_character(self) -> bool {
        matches!(self, KeyClass::Printable | KeyClass::Whitespace)
    }
}

/// Event-specific data carried by a [`RawEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    None,
    /// Pointer position in screen pixels
    Pointer { x: f64, y: f64 },
    Key { class: KeyClass },
}

/// A timestamped, normalized interaction notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: RawEventKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "no_payload")]
    pub payload: EventPayload,
}

fn no_payload() -> EventPayload {
    EventPayload::None
}

impl RawEvent {
    pub fn new(kind: RawEventKind, payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            payload,
        }
    }

    pub fn pointer_move(x: f64, y: f64, timestamp: DateTime<Utc>) -> Self {
        Self::new(RawEventKind::PointerMove, EventPayload::Pointer { x, y }, timestamp)
    }

    pub fn key_down(class: KeyClass, timestamp: DateTime<Utc>) -> Self {
        Self::new(RawEventKind::KeyDown, EventPayload::Key { class }, timestamp)
    }

    /// Create a payload-free event (focus, clipboard, progress).
    pub fn signal(kind: RawEventKind, timestamp: DateTime<Utc>) -> Self {
        Self::new(kind, EventPayload::None, timestamp)
    }
}
