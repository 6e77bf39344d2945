//! Tracking sessions.
//!
//! A [`TrackingSession`] owns everything that exists for one exam attempt:
//! the observer, a fresh aggregator and typing tracker, and the scheduler task
//! that turns them into packets. Nothing is shared between attempts, so a stop
//! followed by a start never carries data over.

use crate::clock::SessionClock;
use crate::collector::{EventSink, Observer, RawEvent, RawEventKind};
use crate::config::{ConfigError, TelemetryConfig};
use crate::core::features::compute_features;
use crate::core::packet::FeaturePacket;
use crate::core::typing::{TypingConfig, TypingStateMachine};
use crate::core::windowing::WindowedAggregator;
use crate::delivery::{DeliveryChannel, EventType, OutboundMessage};
use crate::scheduler::{EmissionScheduler, SchedulerHandle, TickHandler};
use crate::transparency::SharedTelemetryStats;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Who is being tracked, and whether emission is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub exam_id: String,
    pub active: bool,
}

impl SessionContext {
    /// An active context for the given identifiers.
    pub fn new(user_id: impl Into<String>, exam_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            exam_id: exam_id.into(),
            active: true,
        }
    }

    /// An inactive context with no identifiers.
    pub fn cleared() -> Self {
        Self::default()
    }

    /// Packets may only be produced while active with both identifiers set.
    pub fn is_emitting(&self) -> bool {
        self.active && !self.user_id.trim().is_empty() && !self.exam_id.trim().is_empty()
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tracking sessions must be started inside a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn chrono_duration(value: std::time::Duration, name: &str) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(value)
        .map_err(|_| ConfigError::Invalid(format!("{name} is out of range")))
}

/// Per-tick processing for one session.
///
/// Drains raw events, folds them into the rolling buffers, and produces the
/// typing and behavior packets for the tick. Owned by the scheduler task, so
/// none of this state is shared.
pub struct SessionPipeline {
    events: Receiver<RawEvent>,
    aggregator: WindowedAggregator,
    typing: TypingStateMachine,
    context: watch::Receiver<SessionContext>,
    idle_timeout: chrono::Duration,
    chars_per_word: f64,
    clock: SessionClock,
    stats: SharedTelemetryStats,
}

impl SessionPipeline {
    pub fn new(
        config: &TelemetryConfig,
        events: Receiver<RawEvent>,
        context: watch::Receiver<SessionContext>,
        clock: SessionClock,
        stats: SharedTelemetryStats,
    ) -> Result<Self, ConfigError> {
        let retention = chrono_duration(config.retention_window, "retention_window")?;
        let idle_timeout = chrono_duration(config.idle_timeout, "idle_timeout")?;

        let mut typing = TypingStateMachine::new(TypingConfig {
            idle_timeout,
            window: chrono_duration(config.typing_window, "typing_window")?,
            retention,
            chars_per_word: config.chars_per_word,
        });
        {
            let initial = context.borrow();
            typing.start(initial.user_id.clone(), initial.exam_id.clone());
        }

        Ok(Self {
            events,
            aggregator: WindowedAggregator::new(retention, clock.now()),
            typing,
            context,
            idle_timeout,
            chars_per_word: config.chars_per_word,
            clock,
            stats,
        })
    }

    pub fn aggregator(&self) -> &WindowedAggregator {
        &self.aggregator
    }

    pub fn typing(&self) -> &TypingStateMachine {
        &self.typing
    }

    /// No event at all yet, or none within the idle timeout.
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.aggregator
            .last_event_at()
            .map_or(true, |last| now - last >= self.idle_timeout)
    }
}

impl TickHandler for SessionPipeline {
    fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<OutboundMessage> {
        let context = self.context.borrow().clone();
        let events: Vec<RawEvent> = self.events.try_iter().collect();

        let mut pointer_moved = false;
        if context.is_emitting() {
            for event in &events {
                self.stats.record_event(event.kind.signal());
                self.aggregator.ingest(event);
                self.typing.observe(event);
                pointer_moved |= event.kind == RawEventKind::PointerMove;
            }
        } else if !events.is_empty() {
            trace!(discarded = events.len(), "session inactive, events discarded");
        }

        self.aggregator.prune(now);
        let focus_changes = self.aggregator.take_focus_changes();
        if !context.is_emitting() {
            self.stats.record_tick(true);
            return Vec::new();
        }

        // Focus transitions are reported even on idle ticks
        let mut messages: Vec<OutboundMessage> = focus_changes
            .into_iter()
            .map(|(at, change)| {
                OutboundMessage::new(&context, EventType::for_focus(change), FeaturePacket::focus(at, change))
            })
            .collect();

        // Always advanced so the typing tracker sees its own idle transition
        let typing_sample = self.typing.tick(now);

        if self.is_idle(now) {
            trace!(focus_changes = messages.len(), "session idle, tick suppressed");
            self.stats.record_tick(true);
        } else {
            if let Some(sample) = typing_sample {
                messages.push(OutboundMessage::new(
                    &context,
                    EventType::Typing,
                    FeaturePacket::typing(now, sample),
                ));
            }
            let features = compute_features(&self.aggregator, now, self.chars_per_word);
            let event_type = if pointer_moved {
                EventType::MouseMove
            } else {
                EventType::Features
            };
            messages.push(OutboundMessage::new(
                &context,
                event_type,
                FeaturePacket::behavior(now, features),
            ));
            self.stats.record_tick(false);
        }

        self.stats.record_packets_emitted(messages.len() as u64);
        messages
    }

    fn on_stop(&mut self) {
        let discarded = self.events.try_iter().count();
        self.typing.stop();
        self.aggregator.clear(self.clock.now());
        debug!(discarded, "session pipeline cleared");
    }
}

struct ActiveSession {
    observer: Observer,
    scheduler: SchedulerHandle,
    context: watch::Sender<SessionContext>,
    sink: EventSink,
}

/// Owner of the pipeline for one exam attempt at a time.
pub struct TrackingSession {
    config: TelemetryConfig,
    delivery: DeliveryChannel,
    stats: SharedTelemetryStats,
    active: Option<ActiveSession>,
}

impl TrackingSession {
    pub fn new(config: TelemetryConfig, delivery: DeliveryChannel, stats: SharedTelemetryStats) -> Self {
        Self {
            config,
            delivery,
            stats,
            active: None,
        }
    }

    /// Start tracking `user_id` on `exam_id` and return the sink that UI or
    /// platform code reports interactions to.
    ///
    /// Starting while a session is running stops it first; the new session
    /// begins with empty buffers. Empty identifiers are accepted but nothing
    /// is emitted until the session has both.
    pub fn start(
        &mut self,
        user_id: impl Into<String>,
        exam_id: impl Into<String>,
    ) -> Result<EventSink, SessionError> {
        self.config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        if self.active.is_some() {
            debug!("restarting tracking session");
            self.stop();
        }

        let context = SessionContext::new(user_id, exam_id);
        let clock = SessionClock::new();
        let mut observer = Observer::new(clock);
        let (context_tx, context_rx) = watch::channel(context.clone());

        let pipeline = SessionPipeline::new(
            &self.config,
            observer.receiver().clone(),
            context_rx,
            clock,
            self.stats.clone(),
        )?;

        observer.start();
        let scheduler = EmissionScheduler::new(self.config.emission_period, clock, self.delivery.clone())
            .spawn(pipeline);

        let sink = observer.sink();
        info!(
            user_id = %context.user_id,
            exam_id = %context.exam_id,
            emitting = context.is_emitting(),
            "tracking session started"
        );

        self.active = Some(ActiveSession {
            observer,
            scheduler,
            context: context_tx,
            sink: sink.clone(),
        });
        Ok(sink)
    }

    /// Stop the running session. Handlers are detached and the scheduler is
    /// cancelled before this returns; in-flight deliveries finish on their own.
    pub fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.observer.stop();
        active.scheduler.cancel();
        active.context.send_replace(SessionContext::cleared());
        info!(ticks = active.scheduler.tick_count(), "tracking session stopped");
    }

    /// Suspend emission without ending the session. Events reported while
    /// paused are discarded.
    pub fn pause(&self) {
        if let Some(active) = &self.active {
            active.context.send_modify(|context| context.active = false);
            info!("tracking session paused");
        }
    }

    pub fn resume(&self) {
        if let Some(active) = &self.active {
            active.context.send_modify(|context| context.active = true);
            info!("tracking session resumed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.scheduler.is_running())
    }

    /// Sink of the running session.
    pub fn sink(&self) -> Option<EventSink> {
        self.active.as_ref().map(|a| a.sink.clone())
    }

    /// Context of the running session.
    pub fn context(&self) -> Option<SessionContext> {
        self.active.as_ref().map(|a| a.context.borrow().clone())
    }

    /// Ticks fired by the running session's scheduler.
    pub fn tick_count(&self) -> u64 {
        self.active.as_ref().map_or(0, |a| a.scheduler.tick_count())
    }

    pub fn stats(&self) -> &SharedTelemetryStats {
        &self.stats
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{KeyClass, RawEventKind};
    use crate::transparency::create_shared_stats;
    use chrono::Duration;

    fn at(base: DateTime<Utc>, offset_ms: i64) -> DateTime<Utc> {
        base + Duration::milliseconds(offset_ms)
    }

    fn pipeline(
        context: SessionContext,
    ) -> (
        SessionPipeline,
        crossbeam_channel::Sender<RawEvent>,
        watch::Sender<SessionContext>,
        DateTime<Utc>,
    ) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (context_tx, context_rx) = watch::channel(context);
        let base = Utc::now();
        let clock = SessionClock::anchored_at(base);
        let pipeline = SessionPipeline::new(
            &TelemetryConfig::default(),
            rx,
            context_rx,
            clock,
            create_shared_stats(),
        )
        .unwrap();
        (pipeline, tx, context_tx, base)
    }

    #[test]
    fn test_context_emitting_rules() {
        assert!(SessionContext::new("u", "e").is_emitting());
        assert!(!SessionContext::new("", "e").is_emitting());
        assert!(!SessionContext::new("u", "  ").is_emitting());
        assert!(!SessionContext::cleared().is_emitting());

        let mut paused = SessionContext::new("u", "e");
        paused.active = false;
        assert!(!paused.is_emitting());
    }

    #[test]
    fn test_tick_emits_typing_and_features() {
        let (mut pipeline, tx, _context, base) = pipeline(SessionContext::new("u1", "e1"));
        tx.send(RawEvent::key_down(KeyClass::Printable, at(base, 1_500))).unwrap();

        let messages = pipeline.on_tick(at(base, 3_000));
        let kinds: Vec<EventType> = messages.iter().map(|m| m.event_type).collect();
        assert_eq!(kinds, vec![EventType::Typing, EventType::Features]);
        assert!(messages.iter().all(|m| m.user_id == "u1" && m.exam_id == "e1"));
    }

    #[test]
    fn test_idle_tick_is_suppressed() {
        let (mut pipeline, tx, _context, base) = pipeline(SessionContext::new("u1", "e1"));

        // Nothing observed yet
        assert!(pipeline.on_tick(at(base, 3_000)).is_empty());

        tx.send(RawEvent::signal(RawEventKind::Copy, at(base, 3_500))).unwrap();
        let messages = pipeline.on_tick(at(base, 4_000));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_type, EventType::Features);

        assert!(pipeline.on_tick(at(base, 5_500)).is_empty());
    }

    #[test]
    fn test_pointer_ticks_are_labelled_mouse_move() {
        let (mut pipeline, tx, _context, base) = pipeline(SessionContext::new("u1", "e1"));
        tx.send(RawEvent::pointer_move(0.0, 0.0, at(base, 1_500))).unwrap();
        tx.send(RawEvent::pointer_move(30.0, 40.0, at(base, 1_600))).unwrap();

        let messages = pipeline.on_tick(at(base, 3_000));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_type, EventType::MouseMove);
        assert_eq!(messages[0].payload.features().unwrap().mouse_mean_speed, 500.0);

        tx.send(RawEvent::signal(RawEventKind::Copy, at(base, 4_500))).unwrap();
        let messages = pipeline.on_tick(at(base, 6_000));
        assert_eq!(messages[0].event_type, EventType::Features);
    }

    #[test]
    fn test_focus_transitions_are_reported_even_when_idle() {
        let (mut pipeline, tx, _context, base) = pipeline(SessionContext::new("u1", "e1"));
        tx.send(RawEvent::signal(RawEventKind::FocusLost, at(base, 500))).unwrap();

        // 2500 ms since the last event: idle, but the blur still goes out
        let messages = pipeline.on_tick(at(base, 3_000));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_type, EventType::WindowBlur);
        assert_eq!(messages[0].timestamp, at(base, 500));

        tx.send(RawEvent::signal(RawEventKind::FocusGained, at(base, 5_000))).unwrap();
        let messages = pipeline.on_tick(at(base, 6_000));
        let kinds: Vec<EventType> = messages.iter().map(|m| m.event_type).collect();
        assert_eq!(kinds, vec![EventType::WindowFocus, EventType::Features]);

        let change = messages[0].payload.focus_change().unwrap();
        assert!(change.focused);
        assert_eq!(change.duration_ms, 4_500);

        // Reported once
        tx.send(RawEvent::signal(RawEventKind::Copy, at(base, 8_500))).unwrap();
        let messages = pipeline.on_tick(at(base, 9_000));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_type, EventType::Features);
    }

    #[test]
    fn test_missing_identifiers_suppress_emission() {
        let (mut pipeline, tx, _context, base) = pipeline(SessionContext::new("", "e1"));
        tx.send(RawEvent::key_down(KeyClass::Printable, at(base, 1_000))).unwrap();

        assert!(pipeline.on_tick(at(base, 1_500)).is_empty());
        // Events are not buffered for a session that cannot emit
        assert!(pipeline.aggregator().last_event_at().is_none());
    }

    #[test]
    fn test_paused_context_discards_events() {
        let (mut pipeline, tx, context, base) = pipeline(SessionContext::new("u1", "e1"));
        context.send_modify(|c| c.active = false);

        tx.send(RawEvent::signal(RawEventKind::Paste, at(base, 1_000))).unwrap();
        assert!(pipeline.on_tick(at(base, 1_500)).is_empty());

        context.send_modify(|c| c.active = true);
        tx.send(RawEvent::signal(RawEventKind::Copy, at(base, 2_000))).unwrap();
        let messages = pipeline.on_tick(at(base, 2_500));
        let features = messages[0].payload.features().unwrap();
        assert_eq!(features.paste_frequency, 0);
        assert_eq!(features.copy_frequency, 1);
    }

    #[test]
    fn test_stop_clears_pipeline_state() {
        let (mut pipeline, tx, _context, base) = pipeline(SessionContext::new("u1", "e1"));
        tx.send(RawEvent::key_down(KeyClass::Printable, at(base, 100))).unwrap();
        pipeline.on_tick(at(base, 500));

        pipeline.on_stop();
        assert!(pipeline.aggregator().last_event_at().is_none());
        assert_eq!(pipeline.typing().buffered(), 0);
        assert!(pipeline.typing().context().user_id.is_empty());
    }

    #[test]
    fn test_start_requires_runtime() {
        let delivery = DeliveryChannel::new(
            None,
            std::sync::Arc::new(crate::delivery::HttpFallback::new(&Default::default()).unwrap()),
            std::time::Duration::from_secs(3),
            create_shared_stats(),
        );
        let mut session = TrackingSession::new(TelemetryConfig::default(), delivery, create_shared_stats());
        assert!(matches!(session.start("u", "e"), Err(SessionError::NoRuntime)));
        assert!(!session.is_running());
    }
}
