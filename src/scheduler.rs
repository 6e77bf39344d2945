//! Fixed-period emission scheduler.
//!
//! Ticks run on a timer that is independent of event arrival. Each tick asks a
//! [`TickHandler`] for outbound messages and hands every message to the
//! delivery channel without waiting for it, so a slow delivery never delays
//! the next tick.

use crate::clock::SessionClock;
use crate::delivery::{DeliveryChannel, OutboundMessage};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Work performed on each scheduler tick.
pub trait TickHandler: Send + 'static {
    /// Produce the messages to deliver for the tick at `now`.
    fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<OutboundMessage>;

    /// Called once after the scheduler is cancelled.
    fn on_stop(&mut self) {}
}

/// Periodic driver for a [`TickHandler`].
pub struct EmissionScheduler {
    period: Duration,
    clock: SessionClock,
    delivery: DeliveryChannel,
}

impl EmissionScheduler {
    pub fn new(period: Duration, clock: SessionClock, delivery: DeliveryChannel) -> Self {
        Self {
            period,
            clock,
            delivery,
        }
    }

    /// Start ticking. The first tick fires one period from now.
    pub fn spawn<H: TickHandler>(self, handler: H) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_loop(self, handler, cancel.clone(), ticks.clone()));

        SchedulerHandle {
            cancel,
            task: Some(task),
            ticks,
        }
    }
}

async fn run_loop<H: TickHandler>(
    scheduler: EmissionScheduler,
    mut handler: H,
    cancel: CancellationToken,
    ticks: Arc<AtomicU64>,
) {
    let EmissionScheduler {
        period,
        clock,
        delivery,
    } = scheduler;

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period_ms = period.as_millis() as u64, "emission scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                let messages = handler.on_tick(clock.now());
                trace!(tick, messages = messages.len(), "scheduler tick");
                for message in messages {
                    delivery.dispatch(message);
                }
            }
        }
    }

    handler.on_stop();
    debug!(ticks = ticks.load(Ordering::Relaxed), "emission scheduler stopped");
}

/// Handle to a running scheduler. Dropping it cancels the scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Stop ticking. Deliveries already dispatched are not affected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Cancel and wait for the scheduler task to finish.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
