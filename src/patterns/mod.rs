//! Cache Access Patterns
//!
//! Each pattern couples a [`DataSource`] with the [`DistributedCache`] core:
//!
//! ```text
//!                ┌──────────────┐   miss / expired    ┌──────────────┐
//!  cache-aside   │              │ ──────────────────▶ │              │
//!  write-through │ Distributed  │ ◀── save first ──── │  DataSource  │
//!  write-behind  │    Cache     │ ── buffered flush ─▶│   (source    │
//!  refresh-ahead │              │ ◀── timed reload ── │   of truth)  │
//!                └──────────────┘                     └──────────────┘
//! ```
//!
//! Every data-source call goes through the shared [`RetryPolicy`], so it is
//! bounded by the per-call timeout and retried with backoff.

mod cache_aside;
mod refresh_ahead;
mod scheduler;
mod write_behind;
mod write_through;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{DistributedCache, WriteOptions};
use crate::cluster::duration_millis;
use crate::domain::DataSource;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

pub use cache_aside::CacheAside;
pub use refresh_ahead::RefreshAhead;
pub use scheduler::RefreshScheduler;
pub use write_behind::{FlushReport, PendingOp, PendingWrite, WriteBehind};
pub use write_through::WriteThrough;

/// Access pattern configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternConfig {
    /// Fraction of the TTL after which an entry counts as stale
    pub refresh_threshold: f64,
    /// Serve stale entries while reloading them in the background
    pub stale_while_revalidate: bool,
    /// Longest staleness still served under stale-while-revalidate
    #[serde(with = "duration_millis", rename = "max_stale_time_ms")]
    pub max_stale_time: Duration,
    /// Write-behind buffer bound
    pub max_pending_writes: usize,
    #[serde(with = "duration_millis", rename = "flush_interval_ms")]
    pub flush_interval: Duration,
    /// Write-behind entries saved concurrently per batch
    pub flush_batch_size: usize,
    /// Failed flush attempts before a pending write is dropped
    pub max_write_retries: u32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: 0.8,
            stale_while_revalidate: false,
            max_stale_time: Duration::from_secs(60),
            max_pending_writes: 1000,
            flush_interval: Duration::from_millis(5000),
            flush_batch_size: 100,
            max_write_retries: 3,
        }
    }
}

impl PatternConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.refresh_threshold) {
            return Err(Error::Config(format!(
                "refresh_threshold must be within [0, 1], got {}",
                self.refresh_threshold
            )));
        }
        if self.max_pending_writes == 0 {
            return Err(Error::Config("max_pending_writes must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush_interval_ms must be > 0".into()));
        }
        if self.flush_batch_size == 0 {
            return Err(Error::Config("flush_batch_size must be > 0".into()));
        }
        if self.max_write_retries == 0 {
            return Err(Error::Config("max_write_retries must be > 0".into()));
        }
        Ok(())
    }

    /// Delay from a write until its refresh is due
    pub fn refresh_delay(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.refresh_threshold)
    }
}

/// Load `key` from `source` under the retry policy
pub(crate) async fn load_from_source<V>(
    source: &dyn DataSource<V>,
    retry: &RetryPolicy,
    key: &str,
) -> Result<Option<V>>
where
    V: Send + Sync + 'static,
{
    let attempted = retry
        .run_any("load", || source.load(key))
        .await
        .map_err(Error::from)?;
    Ok(attempted.value)
}

/// Write `value` to the cache, logging instead of failing
pub(crate) async fn populate<V>(
    cache: &DistributedCache,
    key: &str,
    value: &V,
    opts: &WriteOptions,
) -> bool
where
    V: Serialize,
{
    match cache.set_with(key, value, opts).await {
        Ok(written) => written,
        Err(e) => {
            warn!(key, "Could not populate cache: {}", e);
            false
        }
    }
}
