//! Raw event observer.
//!
//! The observer owns the handler registrations for a tracking session and the
//! channel that carries normalized events to the scheduler. UI or platform code
//! never touches the channel directly: it calls an [`EventSink`], which stamps
//! each notification with the session clock and forwards it only while the
//! observer is running.

use crate::clock::SessionClock;
use crate::collector::types::{EventPayload, KeyClass, RawEvent, RawEventKind, Signal};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Observer for one tracking session.
pub struct Observer {
    sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    registrations: BTreeSet<Signal>,
    clock: SessionClock,
}

impl Observer {
    /// Create a new observer. Nothing is registered until [`Observer::start`].
    pub fn new(clock: SessionClock) -> Self {
        Self::with_capacity(clock, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an observer whose channel holds at most `capacity` pending events.
    pub fn with_capacity(clock: SessionClock, capacity: usize) -> Self {
        // Bounded so a stalled scheduler cannot grow memory without limit
        let (sender, receiver) = bounded(capacity);

        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            registrations: BTreeSet::new(),
            clock,
        }
    }

    /// Register one handler per signal group and start forwarding events.
    ///
    /// Starting an already running observer leaves the registrations unchanged.
    pub fn start(&mut self) {
        for signal in Signal::ALL {
            if self.registrations.insert(signal) {
                debug!(?signal, "registered observer handler");
            }
        }
        self.running.store(true, Ordering::SeqCst);
    }

    /// Detach every handler. A no-op when the observer is not started.
    pub fn stop(&mut self) {
        if self.registrations.is_empty() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.registrations.clear();

        // Events emitted before the stop belong to the finished session
        let discarded = self.receiver.try_iter().count();
        debug!(discarded, "observer stopped");
    }

    /// Check if the observer is currently forwarding events.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Currently registered signal groups.
    pub fn registrations(&self) -> impl Iterator<Item = Signal> + '_ {
        self.registrations.iter().copied()
    }

    /// Number of events rejected because the channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Get a handle that UI or platform code uses to report notifications.
    pub fn sink(&self) -> EventSink {
        EventSink {
            sender: self.sender.clone(),
            running: self.running.clone(),
            dropped: self.dropped.clone(),
            clock: self.clock,
        }
    }

    /// Get the receiver for raw events.
    pub fn receiver(&self) -> &Receiver<RawEvent> {
        &self.receiver
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable entry point for interaction notifications.
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<RawEvent>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    clock: SessionClock,
}

impl EventSink {
    /// Stamp and forward a notification. Returns whether it was accepted.
    pub fn emit(&self, kind: RawEventKind, payload: EventPayload) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            trace!(?kind, "observer stopped, notification ignored");
            return false;
        }

        let event = RawEvent::new(kind, payload, self.clock.now());
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn pointer_moved(&self, x: f64, y: f64) -> bool {
        self.emit(RawEventKind::PointerMove, EventPayload::Pointer { x, y })
    }

    /// Report a key press by its DOM-style key name. Only the key class is kept.
    pub fn key_pressed(&self, key: &str) -> bool {
        let class = KeyClass::from_key_name(key);
        self.emit(RawEventKind::KeyDown, EventPayload::Key { class })
    }

    pub fn focus_lost(&self) -> bool {
        self.emit(RawEventKind::FocusLost, EventPayload::None)
    }

    pub fn focus_gained(&self) -> bool {
        self.emit(RawEventKind::FocusGained, EventPayload::None)
    }

    pub fn copied(&self) -> bool {
        self.emit(RawEventKind::Copy, EventPayload::None)
    }

    pub fn pasted(&self) -> bool {
        self.emit(RawEventKind::Paste, EventPayload::None)
    }

    pub fn question_advanced(&self) -> bool {
        self.emit(RawEventKind::QuestionAdvanced, EventPayload::None)
    }

    pub fn answer_changed(&self) -> bool {
        self.emit(RawEventKind::AnswerChanged, EventPayload::None)
    }
}
