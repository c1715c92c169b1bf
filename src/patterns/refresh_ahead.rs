//! Refresh-ahead
//!
//! Every write schedules a reload at `cached_at + ttl * refresh_threshold`.
//! The reload writes the fresh value back, which schedules the next one, so
//! hot keys never expire while the source keeps answering. An explicit
//! `set` or `delete` replaces the timer for its key, and a reload already
//! in flight for that key is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{load_from_source, PatternConfig, RefreshScheduler};
use crate::cache::{decode_value, DistributedCache, WriteOptions};
use crate::domain::DataSource;
use crate::error::Result;
use crate::retry::RetryPolicy;

struct Inner<V>
where
    V: Send + Sync + 'static,
{
    cache: Arc<DistributedCache>,
    source: Arc<dyn DataSource<V>>,
    config: PatternConfig,
    retry: RetryPolicy,
    scheduler: RefreshScheduler,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl<V> Inner<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn write(self: &Arc<Self>, key: &str, value: &V, ttl: Duration) -> Result<bool> {
        let written = self
            .cache
            .set_with(key, value, &WriteOptions::with_ttl(ttl))
            .await?;
        if written {
            self.schedule_in(key, self.config.refresh_delay(ttl), ttl);
        } else {
            self.scheduler.cancel(key);
        }
        Ok(written)
    }

    fn schedule_in(self: &Arc<Self>, key: &str, delay: Duration, ttl: Duration) {
        let inner = Arc::clone(self);
        let owned = key.to_string();
        self.scheduler.schedule_with(key, delay, move |token| {
            async move { inner.refresh(&owned, ttl, token).await }.boxed()
        });
        debug!(key, ?delay, "Refresh scheduled");
    }

    async fn refresh(self: &Arc<Self>, key: &str, ttl: Duration, token: CancellationToken) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let loaded = load_from_source(self.source.as_ref(), &self.retry, key).await;
        if token.is_cancelled() {
            debug!(key, "Key written or deleted during refresh, discarding reload");
            return;
        }
        match loaded {
            Ok(Some(value)) => {
                if let Err(e) = self.write(key, &value, ttl).await {
                    self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key, "Refreshed value could not be cached: {}", e);
                }
            }
            Ok(None) => {
                debug!(key, "Source no longer has key, evicting");
                if let Err(e) = self.cache.delete(key).await {
                    warn!(key, "Could not evict vanished key: {}", e);
                }
            }
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, "Refresh failed, entry will expire: {}", e);
            }
        }
    }
}

/// Cache that reloads entries before they expire
pub struct RefreshAhead<V>
where
    V: Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

impl<V> RefreshAhead<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        cache: Arc<DistributedCache>,
        source: Arc<dyn DataSource<V>>,
        config: PatternConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                source,
                config,
                retry,
                scheduler: RefreshScheduler::new(),
                refreshes: AtomicU64::new(0),
                refresh_failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.inner.cache
    }

    /// Cache `value` with the default TTL and schedule its refresh
    pub async fn set(&self, key: &str, value: &V) -> Result<bool> {
        let ttl = self.inner.cache.config().default_ttl();
        self.inner.write(key, value, ttl).await
    }

    #[instrument(skip(self, value))]
    pub async fn set_with_ttl(&self, key: &str, value: &V, ttl: Duration) -> Result<bool> {
        self.inner.write(key, value, ttl).await
    }

    /// Read through the cache; a miss loads, caches and schedules
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        let inner = &self.inner;
        let now = inner.cache.clock().now();
        match inner.cache.get_entry(key).await {
            Ok(Some(entry)) if !entry.is_expired(now) => match decode_value(&entry) {
                Ok(value) => {
                    if inner.scheduler.scheduled_at(key).is_none() {
                        // Written elsewhere (or before a restart): pick up its cycle
                        let due = entry.stale_at(inner.config.refresh_threshold);
                        let delay = (due - now).to_std().unwrap_or(Duration::ZERO);
                        inner.schedule_in(key, delay, entry.ttl());
                    }
                    return Ok(Some(value));
                }
                Err(e) => warn!("Cached value undecodable, reloading: {}", e),
            },
            Ok(_) => {}
            Err(e) => warn!("Cache read failed, falling back to source: {}", e),
        }

        let loaded = load_from_source(inner.source.as_ref(), &inner.retry, key).await?;
        if let Some(value) = &loaded {
            let ttl = inner.cache.config().default_ttl();
            if let Err(e) = inner.write(key, value, ttl).await {
                warn!("Could not populate cache: {}", e);
            }
        }
        Ok(loaded)
    }

    /// Cancel the key's refresh and evict it
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.scheduler.cancel(key);
        self.inner.cache.delete(key).await
    }

    /// When the refresh for `key` is due
    pub fn scheduled_at(&self, key: &str) -> Option<Instant> {
        self.inner.scheduler.scheduled_at(key)
    }

    /// Keys with a pending refresh
    pub fn scheduled(&self) -> usize {
        self.inner.scheduler.len()
    }

    /// Refreshes started since creation
    pub fn refreshes(&self) -> u64 {
        self.inner.refreshes.load(Ordering::Relaxed)
    }

    pub fn refresh_failures(&self) -> u64 {
        self.inner.refresh_failures.load(Ordering::Relaxed)
    }

    /// Cancel every pending refresh and wait for running ones
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
    }
}
