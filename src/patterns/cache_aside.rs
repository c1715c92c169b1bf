//! Cache-aside (lazy loading)
//!
//! ```text
//! get(k) ──▶ cache ──fresh──────────────────────────────▶ value
//!              │
//!              ├─stale, SWR, within max_stale ──▶ value + background reload
//!              ├─stale otherwise ──────────────▶ value
//!              └─miss / expired / cache error ─▶ load(k) ─▶ populate ─▶ value
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use super::{load_from_source, populate, PatternConfig};
use crate::cache::{decode_value, DistributedCache, Freshness, WriteOptions};
use crate::domain::DataSource;
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Lazily populated cache in front of a data source
pub struct CacheAside<V>
where
    V: Send + Sync + 'static,
{
    cache: Arc<DistributedCache>,
    source: Arc<dyn DataSource<V>>,
    config: PatternConfig,
    retry: RetryPolicy,
    /// Background reloads in flight; cancelled by explicit writes
    revalidating: Arc<Mutex<HashMap<String, CancellationToken>>>,
    tasks: TaskTracker,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheAside<V>
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
            cache,
            source,
            config,
            retry,
            revalidating: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
            _value: PhantomData,
        }
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.cache
    }

    /// Read through the cache, loading from the source when needed
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        let now = self.cache.clock().now();
        match self.cache.get_entry(key).await {
            Ok(Some(entry)) => {
                let threshold = self.config.refresh_threshold;
                match entry.freshness(now, threshold) {
                    Freshness::Fresh => match decode_value(&entry) {
                        Ok(value) => return Ok(Some(value)),
                        Err(e) => warn!("Cached value undecodable, reloading: {}", e),
                    },
                    Freshness::Stale => {
                        let staleness = entry.staleness(now, threshold);
                        let revalidate = self.config.stale_while_revalidate;
                        if revalidate && staleness > self.config.max_stale_time {
                            debug!(?staleness, "Too stale to serve, reloading");
                        } else {
                            match decode_value(&entry) {
                                Ok(value) => {
                                    if revalidate {
                                        self.revalidate(key, entry.ttl());
                                    }
                                    return Ok(Some(value));
                                }
                                Err(e) => warn!("Cached value undecodable, reloading: {}", e),
                            }
                        }
                    }
                    Freshness::Expired => debug!("Cached entry expired"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed, falling back to source: {}", e),
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<Option<V>> {
        let loaded = load_from_source(self.source.as_ref(), &self.retry, key).await?;
        if let Some(value) = &loaded {
            populate(&self.cache, key, value, &WriteOptions::default()).await;
        }
        Ok(loaded)
    }

    /// Reload `key` in the background unless a reload is already running
    fn revalidate(&self, key: &str, ttl: Duration) {
        let token = {
            let mut revalidating = self.revalidating.lock();
            if revalidating.contains_key(key) {
                return;
            }
            let token = CancellationToken::new();
            revalidating.insert(key.to_string(), token.clone());
            token
        };

        let cache = Arc::clone(&self.cache);
        let source = Arc::clone(&self.source);
        let retry = self.retry.clone();
        let revalidating = Arc::clone(&self.revalidating);
        let key = key.to_string();
        self.tasks.spawn(async move {
            debug!(key = %key, "Revalidating stale entry");
            let reload = async {
                match load_from_source(source.as_ref(), &retry, &key).await {
                    Ok(Some(value)) => {
                        populate(&cache, &key, &value, &WriteOptions::with_ttl(ttl)).await;
                    }
                    Ok(None) => {
                        if let Err(e) = cache.delete(&key).await {
                            warn!(key = %key, "Could not drop vanished entry: {}", e);
                        }
                    }
                    Err(e) => warn!(key = %key, "Background revalidation failed: {}", e),
                }
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(key = %key, "Key written or deleted, revalidation discarded");
                    return;
                }
                _ = reload => {}
            }
            revalidating.lock().remove(&key);
        });
    }

    /// Keys with a background reload in flight
    pub fn revalidating(&self) -> usize {
        self.revalidating.lock().len()
    }

    pub async fn set(&self, key: &str, value: &V) -> Result<bool> {
        self.supersede(key);
        self.cache.set(key, value).await
    }

    pub async fn set_with(&self, key: &str, value: &V, opts: &WriteOptions) -> Result<bool> {
        self.supersede(key);
        self.cache.set_with(key, value, opts).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.supersede(key);
        self.cache.delete(key).await
    }

    /// Drop any background reload of `key` before it can write back
    fn supersede(&self, key: &str) {
        if let Some(token) = self.revalidating.lock().remove(key) {
            token.cancel();
        }
    }

    /// Wait for background reloads
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryDataSource;
    use crate::cache::TokioClock;
    use crate::cluster::NodeStores;
    use crate::config::Settings;

    fn fixture(config: PatternConfig) -> (CacheAside<String>, Arc<InMemoryDataSource<String>>) {
        let settings = Settings::default();
        let (stores, _) = NodeStores::in_memory(&settings.cluster);
        let cache = DistributedCache::new(&settings, stores)
            .unwrap()
            .with_clock(Arc::new(TokioClock::new()));
        let source = Arc::new(InMemoryDataSource::new());
        let pattern = CacheAside::new(
            Arc::new(cache),
            source.clone(),
            config,
            RetryPolicy::new(settings.retry.clone()),
        );
        (pattern, source)
    }

    #[tokio::test]
    async fn test_miss_loads_once_then_hits() {
        let (pattern, source) = fixture(PatternConfig::default());
        source.insert("k", "v".to_string());

        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(source.loads_of("k"), 1);
    }

    #[tokio::test]
    async fn test_absent_everywhere() {
        let (pattern, source) = fixture(PatternConfig::default());
        assert_eq!(pattern.get("nope").await.unwrap(), None);
        assert_eq!(source.counters().loads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_load_failure_retried() {
        let (pattern, source) = fixture(PatternConfig::default());
        source.insert("k", "v".to_string());
        source.fail_next_loads(2);

        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(source.counters().loads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_surfaces_after_retries() {
        let (pattern, source) = fixture(PatternConfig::default());
        source.fail_next_loads(10);
        assert!(pattern.get("k").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reloads() {
        let (pattern, source) = fixture(PatternConfig::default());
        source.insert("k", "old".to_string());
        pattern
            .set_with("k", &"old".to_string(), &WriteOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        source.insert("k", "new".to_string());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_while_revalidate() {
        let (pattern, source) = fixture(PatternConfig {
            stale_while_revalidate: true,
            refresh_threshold: 0.5,
            ..Default::default()
        });
        pattern
            .set_with("k", &"old".to_string(), &WriteOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        source.insert("k", "new".to_string());

        // Stale but not expired: served as-is, reloaded in the background
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("old"));

        pattern.shutdown().await;
        assert_eq!(source.loads_of("k"), 1);
        assert_eq!(pattern.revalidating(), 0);
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_without_revalidate_is_served() {
        let (pattern, source) = fixture(PatternConfig {
            refresh_threshold: 0.5,
            ..Default::default()
        });
        pattern
            .set_with("k", &"old".to_string(), &WriteOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("old"));
        assert_eq!(source.counters().loads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_stale_reloads_synchronously() {
        let (pattern, source) = fixture(PatternConfig {
            stale_while_revalidate: true,
            refresh_threshold: 0.1,
            max_stale_time: Duration::from_secs(1),
            ..Default::default()
        });
        pattern
            .set_with("k", &"old".to_string(), &WriteOptions::with_ttl(Duration::from_secs(100)))
            .await
            .unwrap();
        source.insert("k", "new".to_string());

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("new"));
        assert_eq!(pattern.revalidating(), 0);
    }

    #[tokio::test]
    async fn test_delete_proxies_to_cache() {
        let (pattern, source) = fixture(PatternConfig::default());
        pattern.set("k", &"v".to_string()).await.unwrap();
        assert!(pattern.delete("k").await.unwrap());
        assert_eq!(pattern.get("k").await.unwrap(), None);
        assert_eq!(source.counters().loads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_during_revalidation_stays_deleted() {
        let (pattern, source) = fixture(PatternConfig {
            stale_while_revalidate: true,
            refresh_threshold: 0.5,
            ..Default::default()
        });
        pattern
            .set_with("k", &"old".to_string(), &WriteOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        source.insert("k", "new".to_string());
        source.set_latency(Duration::from_millis(500));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("old"));
        assert_eq!(pattern.revalidating(), 1);

        assert!(pattern.delete("k").await.unwrap());
        assert_eq!(pattern.revalidating(), 0);
        pattern.shutdown().await;

        assert_eq!(pattern.cache().get::<String>("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_during_revalidation_wins() {
        let (pattern, source) = fixture(PatternConfig {
            stale_while_revalidate: true,
            refresh_threshold: 0.5,
            ..Default::default()
        });
        pattern
            .set_with("k", &"old".to_string(), &WriteOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        source.insert("k", "from-source".to_string());
        source.set_latency(Duration::from_millis(500));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(pattern.get("k").await.unwrap().as_deref(), Some("old"));
        pattern.set("k", &"mine".to_string()).await.unwrap();
        pattern.shutdown().await;

        assert_eq!(
            pattern.cache().get::<String>("k").await.unwrap().as_deref(),
            Some("mine")
        );
    }
}
