//! In-Memory Adapters
//!
//! [`InMemoryStore`] implements [`BackingStore`] on a `DashMap` with lazy
//! TTL expiry; [`InMemoryDataSource`] implements [`DataSource`] on another.
//! Both carry operation counters and fault switches so that tests and the
//! CLI demo can observe and break them.
//!
//! Expiry is measured with `tokio::time::Instant`, so a paused Tokio clock
//! drives it deterministically.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::ports::{BackingStore, DataSource};
use crate::error::{Error, Result};

// =============================================================================
// Glob Matching
// =============================================================================

/// Translate a store glob (`*`, `?`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| Error::Store(format!("invalid pattern '{}': {}", pattern, e)))
}

// =============================================================================
// In-Memory Backing Store
// =============================================================================

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Call counters of an [`InMemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreCounters {
    pub pings: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub batches: u64,
    pub scans: u64,
    pub failures: u64,
}

/// In-memory backing store for tests and the demo binary
#[derive(Debug, Default)]
pub struct InMemoryStore {
    name: String,
    data: DashMap<String, StoredValue>,
    offline: AtomicBool,
    /// Artificial per-call latency (ms)
    latency_ms: AtomicU64,
    pings: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    batches: AtomicU64,
    scans: AtomicU64,
    failures: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make every call fail (simulated outage) or recover
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored bytes, bypassing counters and faults
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.data.clone())
    }

    /// Remaining TTL of a live entry (`None` when absent or persistent)
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|v| v.is_live(now))
            .and_then(|v| v.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            pings: self.pings.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Apply latency and outage simulation
    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.is_offline() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Store(format!("node {} is unreachable", self.name)));
        }
        Ok(())
    }

    fn read_live(&self, key: &str, now: Instant) -> Option<Bytes> {
        let value = self.data.get(key)?;
        if value.is_live(now) {
            return Some(value.data.clone());
        }
        drop(value);
        self.data.remove_if(key, |_, v| !v.is_live(now));
        None
    }

    fn write(&self, key: &str, data: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.data
            .insert(key.to_string(), StoredValue { data, expires_at });
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        self.enter().await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.enter().await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.read_live(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(self
            .data
            .remove(key)
            .map_or(false, |(_, v)| v.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.read_live(key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.enter().await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        match self.data.get_mut(key) {
            Some(mut value) if value.is_live(now) => {
                value.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.enter().await?;
        self.batches.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(keys.iter().map(|k| self.read_live(k, now)).collect())
    }

    async fn mset(&self, pairs: &[(String, Bytes)], ttl: Option<Duration>) -> Result<()> {
        self.enter().await?;
        self.batches.fetch_add(1, Ordering::Relaxed);
        for (key, value) in pairs {
            self.write(key, value.clone(), ttl);
        }
        Ok(())
    }

    async fn keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        self.enter().await?;
        self.scans.fetch_add(1, Ordering::Relaxed);
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.value().is_live(now) && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// In-Memory Data Source
// =============================================================================

/// Call counters of an [`InMemoryDataSource`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounters {
    pub loads: u64,
    pub saves: u64,
    pub deletes: u64,
    pub failures: u64,
}

/// Map-backed data source with fault injection
#[derive(Debug)]
pub struct InMemoryDataSource<V> {
    data: DashMap<String, V>,
    loads_by_key: DashMap<String, u64>,
    loads: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
    fail_loads: AtomicU32,
    fail_saves: AtomicU32,
    fail_deletes: AtomicU32,
    latency_ms: AtomicU64,
}

impl<V> Default for InMemoryDataSource<V> {
    fn default() -> Self {
        Self {
            data: DashMap::new(),
            loads_by_key: DashMap::new(),
            loads: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            fail_loads: AtomicU32::new(0),
            fail_saves: AtomicU32::new(0),
            fail_deletes: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }
}

impl<V: Clone> InMemoryDataSource<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a value without counting a save
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.data.insert(key.into(), value);
    }

    /// Remove a value without counting a delete
    pub fn remove(&self, key: &str) -> Option<V> {
        self.data.remove(key).map(|(_, v)| v)
    }

    /// Current authoritative value
    pub fn value(&self, key: &str) -> Option<V> {
        self.data.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fail the next `n` loads
    pub fn fail_next_loads(&self, n: u32) {
        self.fail_loads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` saves
    pub fn fail_next_saves(&self, n: u32) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` deletes
    pub fn fail_next_deletes(&self, n: u32) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn counters(&self) -> SourceCounters {
        SourceCounters {
            loads: self.loads.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Number of loads issued for `key`
    pub fn loads_of(&self, key: &str) -> u64 {
        self.loads_by_key.get(key).map_or(0, |c| *c)
    }

    async fn enter(&self, switch: &AtomicU32, op: &str, key: &str) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let tripped = switch
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::DataSource(format!("injected {} failure for {}", op, key)));
        }
        Ok(())
    }
}

#[async_trait]
impl<V> DataSource<V> for InMemoryDataSource<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn load(&self, key: &str) -> Result<Option<V>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        *self.loads_by_key.entry(key.to_string()).or_insert(0) += 1;
        self.enter(&self.fail_loads, "load", key).await?;
        Ok(self.value(key))
    }

    async fn save(&self, key: &str, value: &V) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.enter(&self.fail_saves, "save", key).await?;
        self.data.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.enter(&self.fail_deletes, "delete", key).await?;
        Ok(self.data.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("cache:default:user:*").unwrap();
        assert!(re.is_match("cache:default:user:42"));
        assert!(!re.is_match("cache:other:user:42"));

        let re = glob_to_regex("a?c").unwrap();
        assert!(re.is_match("abc"));
        assert!(!re.is_match("abbc"));

        // Regex metacharacters are literal
        let re = glob_to_regex("v1.0+*").unwrap();
        assert!(re.is_match("v1.0+beta"));
        assert!(!re.is_match("v100+beta"));
    }

    #[tokio::test]
    async fn test_store_basic_operations() {
        let store = InMemoryStore::new("n0");
        store.set("a", Bytes::from_static(b"1"), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"1")));
        assert!(store.exists("a").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_ttl_expiry() {
        let store = InMemoryStore::new("n0");
        store
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_expire_resets_ttl() {
        let store = InMemoryStore::new("n0");
        store.set("k", Bytes::from_static(b"v"), None).await.unwrap();
        assert_eq!(store.ttl("k"), None);

        assert!(store.expire("k", Duration::from_secs(5)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_batches_and_scan() {
        let store = InMemoryStore::new("n0");
        let pairs = vec![
            ("p:ns:a".to_string(), Bytes::from_static(b"1")),
            ("p:ns:b".to_string(), Bytes::from_static(b"2")),
            ("p:other:c".to_string(), Bytes::from_static(b"3")),
        ];
        store.mset(&pairs, None).await.unwrap();

        let values = store
            .mget(&["p:ns:a".to_string(), "p:ns:zz".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(Bytes::from_static(b"1")), None]);

        let keys = store.keys_by_pattern("p:ns:*").await.unwrap();
        assert_eq!(keys, vec!["p:ns:a".to_string(), "p:ns:b".to_string()]);
        assert_eq!(store.counters().batches, 2);
        assert_eq!(store.counters().scans, 1);
    }

    #[tokio::test]
    async fn test_store_offline() {
        let store = InMemoryStore::new("n0");
        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(Error::Store(_))));
        assert!(store.get("k").await.is_err());
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
        assert_eq!(store.counters().failures, 2);
    }

    #[tokio::test]
    async fn test_data_source_counters_and_faults() {
        let source = InMemoryDataSource::<String>::new();
        source.insert("k", "v".to_string());

        source.fail_next_loads(1);
        assert!(source.load("k").await.is_err());
        assert_eq!(source.load("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(source.loads_of("k"), 2);

        source.save("k2", &"v2".to_string()).await.unwrap();
        assert_eq!(source.value("k2").as_deref(), Some("v2"));
        assert!(source.delete("k2").await.unwrap());
        assert!(!source.delete("k2").await.unwrap());

        assert_eq!(
            source.counters(),
            SourceCounters {
                loads: 2,
                saves: 1,
                deletes: 2,
                failures: 1,
            }
        );
    }

    #[test]
    fn test_oversized_latency_saturates() {
        let huge = Duration::from_secs(u64::MAX);

        let store = InMemoryStore::new("node-0");
        store.set_latency(huge);
        assert_eq!(store.latency_ms.load(Ordering::Relaxed), u64::MAX);

        let source = InMemoryDataSource::<String>::new();
        source.set_latency(huge);
        assert_eq!(source.latency_ms.load(Ordering::Relaxed), u64::MAX);
    }
}
