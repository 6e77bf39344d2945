//! Session clock mapping the runtime's monotonic time onto wall-clock timestamps.
//!
//! Every timestamp in a tracking session comes from one `SessionClock`, so the
//! observer, the scheduler and the packets agree on "now". Because the monotonic
//! side is `tokio::time::Instant`, tests running with paused time get fully
//! deterministic timestamps.

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

/// Wall-clock anchor plus the monotonic instant it was taken at.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl SessionClock {
    /// Create a clock anchored at the current time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Create a clock whose current reading is `wall_anchor`.
    pub fn anchored_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
        }
    }

    /// Current wall-clock time as seen by this session.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.mono_anchor.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.wall_anchor + elapsed
    }

    /// The wall-clock time the clock was anchored at.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.wall_anchor
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
