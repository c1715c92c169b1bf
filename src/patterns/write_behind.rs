//! Write-behind (write-back)
//!
//! Writes land in the cache immediately and are buffered for the data
//! source. A periodic flush drains the buffer in batches:
//!
//! ```text
//! set(k, v) ──▶ cache.set ──▶ pending[k] = Save(v)       (last write wins)
//!                                  │
//!            every flush_interval  ▼
//!            ┌──────────────────────────────────────────────┐
//!            │ drain ─▶ batches of flush_batch_size ─▶ save │
//!            │ failure: attempts += 1, re-queue unless a    │
//!            │ newer write exists; drop at max_write_retries│
//!            └──────────────────────────────────────────────┘
//! ```
//!
//! The buffer never holds more than `max_pending_writes` keys: a full buffer
//! forces a synchronous flush, and if it is still full afterwards the oldest
//! pending write is dropped. Every drop is logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{load_from_source, populate, PatternConfig};
use crate::cache::{decode_value, DistributedCache, WriteOptions};
use crate::domain::DataSource;
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Buffered source operation
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp<V> {
    Save(V),
    Delete,
}

/// One buffered write
#[derive(Debug, Clone)]
pub struct PendingWrite<V> {
    pub key: String,
    pub op: PendingOp<V>,
    pub enqueued_at: DateTime<Utc>,
    /// Failed flush attempts so far
    pub attempts: u32,
    seq: u64,
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Writes the source accepted
    pub flushed: usize,
    /// Failed writes queued for another attempt
    pub retried: usize,
    /// Failed writes given up on
    pub dropped: usize,
    /// Buffer size after the flush
    pub remaining: usize,
}

struct Inner<V>
where
    V: Send + Sync + 'static,
{
    cache: Arc<DistributedCache>,
    source: Arc<dyn DataSource<V>>,
    config: PatternConfig,
    retry: RetryPolicy,
    pending: Mutex<HashMap<String, PendingWrite<V>>>,
    /// Serializes flushes
    flush_lock: tokio::sync::Mutex<()>,
    seq: AtomicU64,
    dropped: AtomicU64,
}

impl<V> Inner<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn new_write(&self, key: &str, op: PendingOp<V>) -> PendingWrite<V> {
        PendingWrite {
            key: key.to_string(),
            op,
            enqueued_at: self.cache.clock().now(),
            attempts: 0,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Insert unless that would grow a full buffer; hands the write back if so
    fn try_insert(&self, write: PendingWrite<V>) -> Option<PendingWrite<V>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&write.key) || pending.len() < self.config.max_pending_writes {
            pending.insert(write.key.clone(), write);
            None
        } else {
            Some(write)
        }
    }

    async fn enqueue(&self, key: &str, op: PendingOp<V>) {
        let Some(write) = self.try_insert(self.new_write(key, op)) else {
            return;
        };

        debug!(
            limit = self.config.max_pending_writes,
            "Pending buffer full, forcing flush"
        );
        self.flush().await;

        let mut pending = self.pending.lock();
        if !pending.contains_key(&write.key) && pending.len() >= self.config.max_pending_writes {
            let oldest = pending
                .values()
                .min_by_key(|w| w.seq)
                .map(|w| w.key.clone());
            if let Some(oldest) = oldest {
                pending.remove(&oldest);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %oldest, "Pending buffer still full after flush, dropping oldest write");
            }
        }
        pending.insert(write.key.clone(), write);
    }

    async fn persist(&self, write: &PendingWrite<V>) -> Result<()> {
        match &write.op {
            PendingOp::Save(value) => {
                self.retry
                    .attempt("save", self.source.save(&write.key, value))
                    .await
            }
            PendingOp::Delete => self
                .retry
                .attempt("delete", self.source.delete(&write.key))
                .await
                .map(|_| ()),
        }
    }

    async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let mut drained: Vec<PendingWrite<V>> =
            self.pending.lock().drain().map(|(_, w)| w).collect();
        drained.sort_by_key(|w| w.seq);

        let mut report = FlushReport::default();
        for batch in drained.chunks(self.config.flush_batch_size) {
            let results = join_all(batch.iter().map(|w| self.persist(w))).await;
            for (write, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => report.flushed += 1,
                    Err(e) => self.requeue(write, e, &mut report),
                }
            }
        }

        report.remaining = self.pending.lock().len();
        if report.flushed > 0 || report.dropped > 0 {
            info!(
                flushed = report.flushed,
                retried = report.retried,
                dropped = report.dropped,
                remaining = report.remaining,
                "Write-behind flush complete"
            );
        }
        report
    }

    fn requeue(&self, write: &PendingWrite<V>, error: crate::error::Error, report: &mut FlushReport) {
        let attempts = write.attempts + 1;
        if attempts >= self.config.max_write_retries {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            report.dropped += 1;
            warn!(key = %write.key, attempts, "Dropping pending write: {}", error);
            return;
        }

        let mut pending = self.pending.lock();
        if pending.contains_key(&write.key) {
            debug!(key = %write.key, "Failed write superseded by a newer one");
            return;
        }
        if pending.len() >= self.config.max_pending_writes {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            report.dropped += 1;
            warn!(key = %write.key, "Pending buffer full, dropping failed write: {}", error);
            return;
        }
        debug!(key = %write.key, attempts, "Re-queueing failed write: {}", error);
        let mut retry = write.clone();
        retry.attempts = attempts;
        pending.insert(retry.key.clone(), retry);
        report.retried += 1;
    }
}

/// Cache with buffered, asynchronous persistence
pub struct WriteBehind<V>
where
    V: Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V> WriteBehind<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
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
                pending: Mutex::new(HashMap::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                seq: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.inner.cache
    }

    /// Start the periodic flush loop. No-op if already running.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(async move {
            let period = inner.config.flush_interval;
            info!(interval = ?period, "Starting write-behind flush loop");

            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        inner.flush().await;
                    }
                }
            }
        }));
    }

    /// Cache `value` now and queue it for the source.
    ///
    /// Returns whether the cache write succeeded.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: V) -> Result<bool> {
        let cached = populate(&self.inner.cache, key, &value, &WriteOptions::default()).await;
        self.inner.enqueue(key, PendingOp::Save(value)).await;
        Ok(cached)
    }

    /// Evict `key` now and queue its removal from the source.
    ///
    /// Returns whether the cache held it.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let existed = match self.inner.cache.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Cache eviction failed: {}", e);
                false
            }
        };
        self.inner.enqueue(key, PendingOp::Delete).await;
        Ok(existed)
    }

    /// Read a value; buffered writes win over cache and source
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        if let Some(write) = self.inner.pending.lock().get(key) {
            return Ok(match &write.op {
                PendingOp::Save(value) => Some(value.clone()),
                PendingOp::Delete => None,
            });
        }

        let cache = &self.inner.cache;
        let now = cache.clock().now();
        match cache.get_entry(key).await {
            Ok(Some(entry)) if !entry.is_expired(now) => match decode_value(&entry) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => warn!("Cached value undecodable, reloading: {}", e),
            },
            Ok(_) => {}
            Err(e) => warn!("Cache read failed, falling back to source: {}", e),
        }

        let loaded =
            load_from_source(self.inner.source.as_ref(), &self.inner.retry, key).await?;
        if let Some(value) = &loaded {
            populate(cache, key, value, &WriteOptions::default()).await;
        }
        Ok(loaded)
    }

    /// Drain the buffer to the source now
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush().await
    }

    /// Buffered writes awaiting a flush
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Copy of the buffered write for `key`
    pub fn pending(&self, key: &str) -> Option<PendingWrite<V>> {
        self.inner.pending.lock().get(key).cloned()
    }

    /// Writes dropped since creation
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Stop the flush loop and flush what is left
    pub async fn shutdown(&self) -> FlushReport {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Write-behind loop ended abnormally: {}", e);
            }
        }
        let report = self.inner.flush().await;
        info!(
            flushed = report.flushed,
            dropped = report.dropped,
            remaining = report.remaining,
            "Write-behind stopped"
        );
        report
    }
}

impl<V> Drop for WriteBehind<V>
where
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryDataSource;
    use crate::cluster::NodeStores;
    use crate::config::Settings;
    use std::time::Duration;

    fn fixture(config: PatternConfig) -> (WriteBehind<u64>, Arc<InMemoryDataSource<u64>>) {
        let settings = Settings::default();
        let (stores, _) = NodeStores::in_memory(&settings.cluster);
        let cache = Arc::new(DistributedCache::new(&settings, stores).unwrap());
        let source = Arc::new(InMemoryDataSource::new());
        let pattern = WriteBehind::new(
            cache,
            source.clone(),
            config,
            RetryPolicy::new(settings.retry),
        );
        (pattern, source)
    }

    #[tokio::test]
    async fn test_set_caches_now_and_persists_on_flush() {
        let (wb, source) = fixture(PatternConfig::default());
        assert!(wb.set("a", 1).await.unwrap());
        assert_eq!(wb.cache().get::<u64>("a").await.unwrap(), Some(1));
        assert_eq!(source.value("a"), None);
        assert_eq!(wb.pending_len(), 1);

        let report = wb.flush().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(source.value("a"), Some(1));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (wb, source) = fixture(PatternConfig::default());
        wb.set("a", 1).await.unwrap();
        wb.set("a", 2).await.unwrap();
        assert_eq!(wb.pending_len(), 1);
        assert_eq!(wb.pending("a").unwrap().op, PendingOp::Save(2));

        wb.flush().await;
        assert_eq!(source.value("a"), Some(2));
        assert_eq!(source.counters().saves, 1);
    }

    #[tokio::test]
    async fn test_buffer_bound_forces_flush() {
        let (wb, source) = fixture(PatternConfig {
            max_pending_writes: 3,
            ..Default::default()
        });
        for i in 0..10u64 {
            wb.set(&format!("k{}", i), i).await.unwrap();
            assert!(wb.pending_len() <= 3);
        }
        assert_eq!(source.len() + wb.pending_len(), 10);
        assert_eq!(wb.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_with_failing_source_drops_oldest() {
        let (wb, source) = fixture(PatternConfig {
            max_pending_writes: 2,
            max_write_retries: 5,
            ..Default::default()
        });
        source.fail_next_saves(100);

        wb.set("a", 1).await.unwrap();
        wb.set("b", 2).await.unwrap();
        wb.set("c", 3).await.unwrap();

        assert_eq!(wb.pending_len(), 2);
        assert_eq!(wb.dropped(), 1);
        assert!(wb.pending("a").is_none());
        assert!(wb.pending("c").is_some());
    }

    #[tokio::test]
    async fn test_failed_write_dropped_after_max_retries() {
        let (wb, source) = fixture(PatternConfig {
            max_write_retries: 2,
            ..Default::default()
        });
        source.fail_next_saves(10);
        wb.set("a", 1).await.unwrap();

        let first = wb.flush().await;
        assert_eq!(first.retried, 1);
        assert_eq!(wb.pending("a").unwrap().attempts, 1);

        let second = wb.flush().await;
        assert_eq!(second.dropped, 1);
        assert_eq!(wb.pending_len(), 0);
        assert_eq!(wb.dropped(), 1);
        assert_eq!(source.value("a"), None);
    }

    #[tokio::test]
    async fn test_pending_delete_shadows_source() {
        let (wb, source) = fixture(PatternConfig::default());
        source.insert("a", 9);
        wb.delete("a").await.unwrap();
        assert_eq!(wb.get("a").await.unwrap(), None);
        assert_eq!(source.counters().loads, 0);

        wb.flush().await;
        assert_eq!(source.value("a"), None);
        assert_eq!(source.counters().deletes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let (wb, source) = fixture(PatternConfig {
            flush_interval: Duration::from_secs(5),
            ..Default::default()
        });
        wb.start();
        wb.set("a", 1).await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(source.value("a"), None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.value("a"), Some(1));

        wb.set("b", 2).await.unwrap();
        let report = wb.shutdown().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(source.value("b"), Some(2));
    }
}
