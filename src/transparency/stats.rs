//! In-memory capture and delivery counters.
//!
//! Counts only; nothing here identifies the user or holds event content.

use crate::collector::types::Signal;
use crate::delivery::DeliveryRoute;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one process lifetime.
#[derive(Debug)]
pub struct TelemetryStats {
    pointer_events: AtomicU64,
    keyboard_events: AtomicU64,
    focus_events: AtomicU64,
    /// Clipboard and exam-progress events
    other_events: AtomicU64,
    ticks: AtomicU64,
    /// Ticks skipped because the session was inactive or idle
    ticks_suppressed: AtomicU64,
    packets_emitted: AtomicU64,
    acked_via_stream: AtomicU64,
    delivered_via_fallback: AtomicU64,
    delivery_failures: AtomicU64,
    started_at: DateTime<Utc>,
}

impl TelemetryStats {
    pub fn new() -> Self {
        Self {
            pointer_events: AtomicU64::new(0),
            keyboard_events: AtomicU64::new(0),
            focus_events: AtomicU64::new(0),
            other_events: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            ticks_suppressed: AtomicU64::new(0),
            packets_emitted: AtomicU64::new(0),
            acked_via_stream: AtomicU64::new(0),
            delivered_via_fallback: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Record one captured event of the given signal group.
    pub fn record_event(&self, signal: Signal) {
        let counter = match signal {
            Signal::Pointer => &self.pointer_events,
            Signal::Keyboard => &self.keyboard_events,
            Signal::Focus => &self.focus_events,
            Signal::Clipboard | Signal::Progress => &self.other_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scheduler tick, and whether it was suppressed.
    pub fn record_tick(&self, suppressed: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if suppressed {
            self.ticks_suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_packets_emitted(&self, count: u64) {
        self.packets_emitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a successful delivery over `route`.
    pub fn record_delivered(&self, route: DeliveryRoute) {
        let counter = match route {
            DeliveryRoute::Stream => &self.acked_via_stream,
            DeliveryRoute::Fallback => &self.delivered_via_fallback,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            pointer_events: self.pointer_events.load(Ordering::Relaxed),
            keyboard_events: self.keyboard_events.load(Ordering::Relaxed),
            focus_events: self.focus_events.load(Ordering::Relaxed),
            other_events: self.other_events.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_suppressed: self.ticks_suppressed.load(Ordering::Relaxed),
            packets_emitted: self.packets_emitted.load(Ordering::Relaxed),
            acked_via_stream: self.acked_via_stream.load(Ordering::Relaxed),
            delivered_via_fallback: self.delivered_via_fallback.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Telemetry Statistics:\n\
             - Pointer events captured: {}\n\
             - Keyboard events captured: {}\n\
             - Focus events captured: {}\n\
             - Other events captured: {}\n\
             - Ticks: {} ({} suppressed)\n\
             - Packets emitted: {}\n\
             - Acked over stream: {}\n\
             - Delivered by fallback: {}\n\
             - Delivery failures: {}\n\
             \n\
             Capture Guarantee:\n\
             - No key content captured\n\
             - Raw signals kept only in rolling memory buffers\n\
             - Only statistical features delivered",
            stats.pointer_events,
            stats.keyboard_events,
            stats.focus_events,
            stats.other_events,
            stats.ticks,
            stats.ticks_suppressed,
            stats.packets_emitted,
            stats.acked_via_stream,
            stats.delivered_via_fallback,
            stats.delivery_failures,
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.pointer_events,
            &self.keyboard_events,
            &self.focus_events,
            &self.other_events,
            &self.ticks,
            &self.ticks_suppressed,
            &self.packets_emitted,
            &self.acked_via_stream,
            &self.delivered_via_fallback,
            &self.delivery_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TelemetryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub pointer_events: u64,
    pub keyboard_events: u64,
    pub focus_events: u64,
    pub other_events: u64,
    pub ticks: u64,
    pub ticks_suppressed: u64,
    pub packets_emitted: u64,
    pub acked_via_stream: u64,
    pub delivered_via_fallback: u64,
    pub delivery_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared stats.
pub type SharedTelemetryStats = Arc<TelemetryStats>;

/// Create a new shared stats instance.
pub fn create_shared_stats() -> SharedTelemetryStats {
    Arc::new(TelemetryStats::new())
}
