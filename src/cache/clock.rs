//! Wall-clock source for entry timestamps
//!
//! Entry timestamps are wall-clock (`chrono`) because they travel with the
//! stored bytes. [`TokioClock`] derives them from Tokio's monotonic clock so
//! that a paused runtime (`tokio::time::pause`) moves entry ages in lockstep
//! with timers.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// Source of "now" for cache entries
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock anchored at construction and advanced by Tokio time.
///
/// Must be created inside the runtime whose clock it follows.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor: DateTime<Utc>,
    instant_anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            wall_anchor: Utc::now(),
            instant_anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.instant_anchor);
        self.wall_anchor + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
