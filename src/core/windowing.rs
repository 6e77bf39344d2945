//! Rolling buffers for raw interaction signals.
//!
//! Each signal keeps a [`WindowedMetricSeries`] whose samples are evicted once
//! they fall out of the retention window. The [`WindowedAggregator`] turns raw
//! events into samples for those series and keeps the cumulative session
//! counters that are not windowed.

use crate::collector::types::{EventPayload, KeyClass, RawEvent, RawEventKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A finished question below this duration counts as a fast answer (ms).
pub const FAST_ANSWER_MS: u64 = 2_000;

/// A finished question above this duration counts as a slow answer (ms).
pub const SLOW_ANSWER_MS: u64 = 20_000;

/// A single numeric sample tagged with the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Time-ordered samples pruned to a retention window.
#[derive(Debug, Clone)]
pub struct WindowedMetricSeries {
    retention: Duration,
    samples: VecDeque<Sample>,
}

impl WindowedMetricSeries {
    /// Create a series that evicts samples older than `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            samples: VecDeque::new(),
        }
    }

    /// Append a sample.
    ///
    /// Timestamps never go backwards: a sample older than the newest one is
    /// recorded at the newest timestamp.
    pub fn record(&mut self, value: f64, timestamp: DateTime<Utc>) {
        let timestamp = match self.samples.back() {
            Some(last) if last.timestamp > timestamp => last.timestamp,
            _ => timestamp,
        };
        self.samples.push_back(Sample { timestamp, value });
    }

    /// Evict samples older than `now - retention`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = retention_cutoff(now, self.retention);
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Prune, then return the live sample values in recording order.
    pub fn read(&mut self, now: DateTime<Utc>) -> Vec<f64> {
        self.prune(now);
        self.values()
    }

    /// Sample values as currently buffered.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Buffered samples in recording order.
    pub fn samples(&self) -> impl DoubleEndedIterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    /// Sum of the values recorded at or after `since`.
    pub fn sum_since(&self, since: DateTime<Utc>) -> f64 {
        self.samples
            .iter()
            .rev()
            .take_while(|s| s.timestamp >= since)
            .map(|s| s.value)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Identifies one of the aggregator's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    /// Pointer speed in pixels per second
    PointerSpeed,
    /// Pointer displacement in pixels
    PointerDisplacement,
    /// Milliseconds between consecutive key presses
    InterKeyInterval,
    /// Milliseconds spent on each finished question
    QuestionDuration,
    /// Characters produced by key presses
    TypedCharacters,
}

/// Cumulative counters since session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub key_presses: u64,
    pub backspaces: u64,
    pub copies: u64,
    pub pastes: u64,
    pub tab_switches: u64,
    pub answer_changes: u64,
    /// Total completed time with the exam window unfocused, in milliseconds
    pub time_outside_ms: u64,
    pub questions_finished: u64,
    /// Total time spent on finished questions, in milliseconds
    pub question_time_ms: u64,
    /// Questions finished in under [`FAST_ANSWER_MS`]
    pub fast_answers: u64,
    /// Questions finished in over [`SLOW_ANSWER_MS`]
    pub slow_answers: u64,
    /// Questions left without any time spent on them
    pub skipped_questions: u64,
}

impl SessionCounters {
    /// Mean time per finished question in milliseconds, 0 before the first one.
    pub fn mean_question_time_ms(&self) -> f64 {
        if self.questions_finished == 0 {
            return 0.0;
        }
        self.question_time_ms as f64 / self.questions_finished as f64
    }

    fn record_question(&mut self, spent_ms: u64) {
        self.questions_finished += 1;
        self.question_time_ms += spent_ms;
        if spent_ms == 0 {
            self.skipped_questions += 1;
        }
        if spent_ms < FAST_ANSWER_MS {
            self.fast_answers += 1;
        } else if spent_ms > SLOW_ANSWER_MS {
            self.slow_answers += 1;
        }
    }
}

/// The exam window lost or regained focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusChange {
    pub focused: bool,
    /// Length of the focus loss that just ended; 0 when focus was lost
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct PointerPoint {
    x: f64,
    y: f64,
    timestamp: DateTime<Utc>,
}

/// Per-session rolling buffers and counters.
#[derive(Debug, Clone)]
pub struct WindowedAggregator {
    retention: Duration,
    pointer_speed: WindowedMetricSeries,
    pointer_displacement: WindowedMetricSeries,
    inter_key_interval: WindowedMetricSeries,
    question_duration: WindowedMetricSeries,
    typed_characters: WindowedMetricSeries,
    counters: SessionCounters,
    last_pointer: Option<PointerPoint>,
    last_key_at: Option<DateTime<Utc>>,
    focus_lost_at: Option<DateTime<Utc>>,
    focus_changes: Vec<(DateTime<Utc>, FocusChange)>,
    question_started_at: DateTime<Utc>,
    last_event_at: Option<DateTime<Utc>>,
}

impl WindowedAggregator {
    /// Create an empty aggregator for a session starting at `started_at`.
    pub fn new(retention: Duration, started_at: DateTime<Utc>) -> Self {
        Self {
            retention,
            pointer_speed: WindowedMetricSeries::new(retention),
            pointer_displacement: WindowedMetricSeries::new(retention),
            inter_key_interval: WindowedMetricSeries::new(retention),
            question_duration: WindowedMetricSeries::new(retention),
            typed_characters: WindowedMetricSeries::new(retention),
            counters: SessionCounters::default(),
            last_pointer: None,
            last_key_at: None,
            focus_lost_at: None,
            focus_changes: Vec::new(),
            question_started_at: started_at,
            last_event_at: None,
        }
    }

    /// Fold one raw event into the buffers and counters.
    pub fn ingest(&mut self, event: &RawEvent) {
        let ts = event.timestamp;
        self.last_event_at = Some(self.last_event_at.map_or(ts, |last| last.max(ts)));

        match (event.kind, event.payload) {
            (RawEventKind::PointerMove, EventPayload::Pointer { x, y }) => self.record_pointer(x, y, ts),
            (RawEventKind::KeyDown, EventPayload::Key { class }) => self.record_key(class, ts),
            (RawEventKind::KeyDown, _) => self.record_key(KeyClass::Other, ts),
            (RawEventKind::FocusLost, _) => {
                self.counters.tab_switches += 1;
                if self.focus_lost_at.is_none() {
                    self.focus_lost_at = Some(ts);
                    self.focus_changes.push((
                        ts,
                        FocusChange {
                            focused: false,
                            duration_ms: 0,
                        },
                    ));
                }
            }
            (RawEventKind::FocusGained, _) => {
                if let Some(lost_at) = self.focus_lost_at.take() {
                    let outside = millis_between(lost_at, ts);
                    self.counters.time_outside_ms += outside;
                    self.focus_changes.push((
                        ts,
                        FocusChange {
                            focused: true,
                            duration_ms: outside,
                        },
                    ));
                }
            }
            (RawEventKind::Copy, _) => self.counters.copies += 1,
            (RawEventKind::Paste, _) => self.counters.pastes += 1,
            (RawEventKind::QuestionAdvanced, _) => {
                let spent = millis_between(self.question_started_at, ts);
                self.question_duration.record(spent as f64, ts);
                self.counters.record_question(spent);
                self.question_started_at = ts;
            }
            (RawEventKind::AnswerChanged, _) => self.counters.answer_changes += 1,
            (RawEventKind::PointerMove, _) => {}
        }
    }

    /// Append a sample to one series directly.
    pub fn record(&mut self, series: Series, value: f64, timestamp: DateTime<Utc>) {
        self.series_mut(series).record(value, timestamp);
    }

    /// Evict expired samples from every series.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.pointer_speed.prune(now);
        self.pointer_displacement.prune(now);
        self.inter_key_interval.prune(now);
        self.question_duration.prune(now);
        self.typed_characters.prune(now);
    }

    /// Prune one series and return its live values.
    pub fn read(&mut self, series: Series, now: DateTime<Utc>) -> Vec<f64> {
        self.series_mut(series).read(now)
    }

    pub fn series(&self, series: Series) -> &WindowedMetricSeries {
        match series {
            Series::PointerSpeed => &self.pointer_speed,
            Series::PointerDisplacement => &self.pointer_displacement,
            Series::InterKeyInterval => &self.inter_key_interval,
            Series::QuestionDuration => &self.question_duration,
            Series::TypedCharacters => &self.typed_characters,
        }
    }

    fn series_mut(&mut self, series: Series) -> &mut WindowedMetricSeries {
        match series {
            Series::PointerSpeed => &mut self.pointer_speed,
            Series::PointerDisplacement => &mut self.pointer_displacement,
            Series::InterKeyInterval => &mut self.inter_key_interval,
            Series::QuestionDuration => &mut self.question_duration,
            Series::TypedCharacters => &mut self.typed_characters,
        }
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Focus transitions ingested since the last call, oldest first.
    pub fn take_focus_changes(&mut self) -> Vec<(DateTime<Utc>, FocusChange)> {
        std::mem::take(&mut self.focus_changes)
    }

    /// Time outside the exam window including a still-open focus loss.
    pub fn time_outside_ms(&self, now: DateTime<Utc>) -> u64 {
        let open = self.focus_lost_at.map_or(0, |lost_at| millis_between(lost_at, now));
        self.counters.time_outside_ms + open
    }

    /// Timestamp of the most recent raw event of any kind.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    /// Timestamp of the most recent pointer sample.
    pub fn last_pointer_at(&self) -> Option<DateTime<Utc>> {
        self.last_pointer.map(|p| p.timestamp)
    }

    /// Start of the current measurement window.
    ///
    /// The window begins at the current question's start but never reaches
    /// further back than the retention window.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.question_started_at.max(retention_cutoff(now, self.retention))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Drop all buffered samples and counters.
    pub fn clear(&mut self, now: DateTime<Utc>) {
        *self = Self::new(self.retention, now);
    }

    fn record_pointer(&mut self, x: f64, y: f64, ts: DateTime<Utc>) {
        if let Some(prev) = self.last_pointer {
            let distance = (x - prev.x).hypot(y - prev.y);
            let elapsed_secs = (ts - prev.timestamp).num_milliseconds() as f64 / 1000.0;

            self.pointer_displacement.record(distance, ts);
            if elapsed_secs > 0.0 {
                self.pointer_speed.record(distance / elapsed_secs, ts);
            }
        }
        self.last_pointer = Some(PointerPoint { x, y, timestamp: ts });
    }

    fn record_key(&mut self, class: KeyClass, ts: DateTime<Utc>) {
        self.counters.key_presses += 1;

        if let Some(prev) = self.last_key_at {
            self.inter_key_interval
                .record(millis_between(prev, ts) as f64, ts);
        }
        self.last_key_at = Some(ts);

        if class == KeyClass::Backspace {
            self.counters.backspaces += 1;
        }
        if class.produces_character() {
            self.typed_characters.record(1.0, ts);
        }
    }
}

/// `now - retention`, saturating at the earliest representable time.
fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Non-negative milliseconds from `from` to `to`.
fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: DateTime<Utc>, offset_ms: i64) -> DateTime<Utc> {
        base + Duration::milliseconds(offset_ms)
    }

    #[test]
    fn test_series_prunes_old_samples() {
        let base = Utc::now();
        let mut series = WindowedMetricSeries::new(Duration::seconds(15));

        series.record(1.0, at(base, 0));
        series.record(2.0, at(base, 10_000));
        series.record(3.0, at(base, 20_000));

        assert_eq!(series.read(at(base, 20_000)), vec![2.0, 3.0]);
        assert_eq!(series.read(at(base, 40_000)), Vec::<f64>::new());
    }

    #[test]
    fn test_series_timestamps_never_go_backwards() {
        let base = Utc::now();
        let mut series = WindowedMetricSeries::new(Duration::seconds(15));

        series.record(1.0, at(base, 500));
        series.record(2.0, at(base, 100));

        let stamps: Vec<_> = series.samples().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![at(base, 500), at(base, 500)]);
    }

    #[test]
    fn test_pointer_speed_from_displacement() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::pointer_move(0.0, 0.0, at(base, 0)));
        // First sample only establishes the reference point
        assert!(agg.series(Series::PointerSpeed).is_empty());

        agg.ingest(&RawEvent::pointer_move(30.0, 40.0, at(base, 100)));
        assert_eq!(agg.series(Series::PointerSpeed).values(), vec![500.0]);
        assert_eq!(agg.series(Series::PointerDisplacement).values(), vec![50.0]);
    }

    #[test]
    fn test_pointer_samples_at_same_instant_have_no_speed() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::pointer_move(0.0, 0.0, base));
        agg.ingest(&RawEvent::pointer_move(3.0, 4.0, base));

        assert!(agg.series(Series::PointerSpeed).is_empty());
        assert_eq!(agg.series(Series::PointerDisplacement).values(), vec![5.0]);
    }

    #[test]
    fn test_keys_produce_intervals_and_counters() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::key_down(KeyClass::Printable, at(base, 0)));
        agg.ingest(&RawEvent::key_down(KeyClass::Whitespace, at(base, 120)));
        agg.ingest(&RawEvent::key_down(KeyClass::Backspace, at(base, 300)));
        agg.ingest(&RawEvent::key_down(KeyClass::Other, at(base, 350)));

        assert_eq!(
            agg.series(Series::InterKeyInterval).values(),
            vec![120.0, 180.0, 50.0]
        );
        assert_eq!(agg.series(Series::TypedCharacters).len(), 2);

        let counters = agg.counters();
        assert_eq!(counters.key_presses, 4);
        assert_eq!(counters.backspaces, 1);
    }

    #[test]
    fn test_focus_transitions_accumulate_time_outside() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::signal(RawEventKind::FocusLost, at(base, 1_000)));
        agg.ingest(&RawEvent::signal(RawEventKind::FocusGained, at(base, 4_000)));
        agg.ingest(&RawEvent::signal(RawEventKind::FocusLost, at(base, 5_000)));

        assert_eq!(agg.counters().tab_switches, 2);
        assert_eq!(agg.counters().time_outside_ms, 3_000);
        // The open focus loss counts up to "now"
        assert_eq!(agg.time_outside_ms(at(base, 6_500)), 4_500);
    }

    #[test]
    fn test_focus_changes_are_taken_once() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::signal(RawEventKind::FocusLost, at(base, 1_000)));
        // A repeated loss while already unfocused is not a new transition
        agg.ingest(&RawEvent::signal(RawEventKind::FocusLost, at(base, 1_200)));
        agg.ingest(&RawEvent::signal(RawEventKind::FocusGained, at(base, 4_000)));

        let changes = agg.take_focus_changes();
        assert_eq!(
            changes,
            vec![
                (at(base, 1_000), FocusChange { focused: false, duration_ms: 0 }),
                (at(base, 4_000), FocusChange { focused: true, duration_ms: 3_000 }),
            ]
        );
        assert!(agg.take_focus_changes().is_empty());
    }

    #[test]
    fn test_question_advance_records_duration_and_moves_window() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::signal(RawEventKind::QuestionAdvanced, at(base, 8_000)));
        agg.ingest(&RawEvent::signal(RawEventKind::QuestionAdvanced, at(base, 9_500)));

        assert_eq!(
            agg.series(Series::QuestionDuration).values(),
            vec![8_000.0, 1_500.0]
        );
        assert_eq!(agg.window_start(at(base, 10_000)), at(base, 9_500));
    }

    #[test]
    fn test_question_durations_expire_but_counters_stay() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.ingest(&RawEvent::signal(RawEventKind::QuestionAdvanced, at(base, 5_000)));
        assert_eq!(agg.read(Series::QuestionDuration, at(base, 10_000)), vec![5_000.0]);

        assert!(agg.read(Series::QuestionDuration, at(base, 600_000)).is_empty());
        let counters = agg.counters();
        assert_eq!(counters.questions_finished, 1);
        assert_eq!(counters.question_time_ms, 5_000);
        assert_eq!(counters.mean_question_time_ms(), 5_000.0);
    }

    #[test]
    fn test_direct_record_and_read_by_series() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);

        agg.record(Series::PointerSpeed, 120.0, at(base, 1_000));
        agg.record(Series::PointerSpeed, 80.0, at(base, 20_000));
        agg.record(Series::InterKeyInterval, 150.0, at(base, 20_000));

        assert_eq!(agg.read(Series::PointerSpeed, at(base, 20_000)), vec![80.0]);
        assert_eq!(agg.read(Series::InterKeyInterval, at(base, 20_000)), vec![150.0]);
        assert!(agg.read(Series::TypedCharacters, at(base, 20_000)).is_empty());
    }

    #[test]
    fn test_huge_retention_does_not_overflow() {
        let base = Utc::now();
        let retention = Duration::milliseconds(100_000_000_000_000_000);
        let mut agg = WindowedAggregator::new(retention, base);

        agg.ingest(&RawEvent::pointer_move(0.0, 0.0, base));
        agg.ingest(&RawEvent::pointer_move(3.0, 4.0, at(base, 100)));
        agg.prune(at(base, 200));

        assert_eq!(agg.series(Series::PointerSpeed).len(), 1);
        assert_eq!(agg.window_start(at(base, 200)), base);
    }

    #[test]
    fn test_window_start_is_bounded_by_retention() {
        let base = Utc::now();
        let agg = WindowedAggregator::new(Duration::seconds(15), base);

        assert_eq!(agg.window_start(at(base, 5_000)), base);
        assert_eq!(agg.window_start(at(base, 60_000)), at(base, 45_000));
    }

    #[test]
    fn test_clear_resets_everything() {
        let base = Utc::now();
        let mut agg = WindowedAggregator::new(Duration::seconds(15), base);
        agg.ingest(&RawEvent::signal(RawEventKind::Copy, base));
        agg.ingest(&RawEvent::key_down(KeyClass::Printable, base));

        agg.clear(at(base, 1_000));
        assert_eq!(agg.counters(), SessionCounters::default());
        assert!(agg.series(Series::TypedCharacters).is_empty());
        assert!(agg.last_event_at().is_none());
    }
}
