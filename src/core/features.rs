//! Feature computation from the rolling buffers.
//!
//! Extraction is a pure function of the aggregator's contents at call time and
//! never fails: empty buffers and zero-length windows degrade to zero-valued
//! features, so a packet can always be produced on schedule.

use crate::core::windowing::{Series, WindowedAggregator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Default number of characters per word for WPM.
pub const DEFAULT_CHARS_PER_WORD: f64 = 5.0;

/// Statistical descriptors of recent interaction behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorFeatures {
    /// Mean pointer speed (px/s)
    pub mouse_mean_speed: f64,
    /// Standard deviation of pointer speed
    pub mouse_std_speed: f64,
    /// Standard deviation of the speed's first difference
    pub mouse_jerk: f64,
    /// Share of the measurement window since the last pointer movement (0-1)
    pub mouse_idle_ratio: f64,
    /// Pointer distance travelled within the window (px)
    pub mouse_total_distance: f64,
    /// Words per minute over the measurement window
    pub typing_speed_wpm: f64,
    /// Mean inter-key interval (ms)
    pub key_mean_iki: f64,
    /// Standard deviation of inter-key intervals
    pub key_std_iki: f64,
    /// Coefficient of variation of inter-key intervals
    pub typing_burstiness: f64,
    pub copy_frequency: u64,
    pub paste_frequency: u64,
    pub backspace_frequency: u64,
    pub tab_switches: u64,
    /// Milliseconds spent with the exam window unfocused
    pub time_outside_window: u64,
    /// Mean time per finished question (ms)
    pub time_per_question: f64,
    pub fast_answers: u64,
    pub slow_answers: u64,
    /// Questions skipped without any time spent on them
    pub skipping_patterns: u64,
    pub answer_change_frequency: u64,
}

/// Compute all behavior features from the aggregator's current contents.
///
/// The caller is expected to have pruned the aggregator for `now`.
pub fn compute_features(
    aggregator: &WindowedAggregator,
    now: DateTime<Utc>,
    chars_per_word: f64,
) -> BehaviorFeatures {
    let speeds = aggregator.series(Series::PointerSpeed).values();
    let intervals = aggregator.series(Series::InterKeyInterval).values();
    let counters = aggregator.counters();

    let window_start = aggregator.window_start(now);
    let window_ms = (now - window_start).num_milliseconds() as f64;

    let key_mean_iki = mean(&intervals);
    let key_std_iki = std_dev(&intervals);

    let typed = aggregator
        .series(Series::TypedCharacters)
        .sum_since(window_start);

    BehaviorFeatures {
        mouse_mean_speed: mean(&speeds),
        mouse_std_speed: std_dev(&speeds),
        mouse_jerk: std_dev(&first_difference(&speeds)),
        mouse_idle_ratio: idle_ratio(aggregator.last_pointer_at(), now, window_ms),
        mouse_total_distance: aggregator
            .series(Series::PointerDisplacement)
            .sum_since(window_start),
        typing_speed_wpm: words_per_minute(typed, window_ms, chars_per_word),
        key_mean_iki,
        key_std_iki,
        typing_burstiness: burstiness(key_mean_iki, key_std_iki),
        copy_frequency: counters.copies,
        paste_frequency: counters.pastes,
        backspace_frequency: counters.backspaces,
        tab_switches: counters.tab_switches,
        time_outside_window: aggregator.time_outside_ms(now),
        time_per_question: counters.mean_question_time_ms(),
        fast_answers: counters.fast_answers,
        slow_answers: counters.slow_answers,
        skipping_patterns: counters.skipped_questions,
        answer_change_frequency: counters.answer_changes,
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Population standard deviation, 0 for an empty slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().population_std_dev()
}

/// Each element minus its predecessor; the first element is differenced
/// against itself.
pub fn first_difference(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| if i == 0 { 0.0 } else { v - values[i - 1] })
        .collect()
}

/// std / mean of inter-key intervals, 0 when the mean is not positive.
pub fn burstiness(mean: f64, std: f64) -> f64 {
    if mean > 0.0 {
        std / mean
    } else {
        0.0
    }
}

/// Characters per word to words per minute over a window of `window_ms`.
pub fn words_per_minute(characters: f64, window_ms: f64, chars_per_word: f64) -> f64 {
    let minutes = window_ms / 60_000.0;
    if minutes <= 0.0 || chars_per_word <= 0.0 {
        return 0.0;
    }
    characters / chars_per_word / minutes
}

/// Time since the last pointer sample as a share of the window, clamped to [0, 1].
fn idle_ratio(last_pointer_at: Option<DateTime<Utc>>, now: DateTime<Utc>, window_ms: f64) -> f64 {
    let Some(last) = last_pointer_at else {
        return 0.0;
    };
    if window_ms <= 0.0 {
        return 0.0;
    }
    let idle_ms = (now - last).num_milliseconds() as f64;
    (idle_ms / window_ms).clamp(0.0, 1.0)
}
