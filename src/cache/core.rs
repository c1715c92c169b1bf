//! Distributed Cache Core
//!
//! Routes every key to its shard, encodes values through the compression
//! pipeline into the stored envelope and talks to the shard's nodes:
//!
//! ```text
//!  get(key) ──▶ prefix:namespace:key ──▶ ShardRouter ──▶ node store.get
//!                                                          │
//!      CacheEntry ◀── decompress + checksum ◀── Envelope::decode
//!
//!  set(key, v) ──▶ serialize ──▶ compress ──▶ Envelope ──▶ primary store.set
//!                                                          │
//!                                    replicas (async for eventual, awaited for strong)
//! ```
//!
//! Every store call is bounded by the retry policy's per-call timeout and
//! retried on transient errors. With failover enabled, a shard that stays
//! unavailable turns reads into misses and writes into `false`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::entry::{add, CacheEntry, ENTRY_VERSION};
use super::envelope::Envelope;
use super::metrics::{CacheMetrics, MetricsSnapshot, OperationType, Outcome, ShardSnapshot};
use super::oplog::{OperationLog, OperationRecord, DEFAULT_OPERATION_LOG_CAPACITY};
use crate::cluster::{HealthMonitor, Node, NodeStatus, NodeStores, Shard, ShardRouter};
use crate::compression::{CompressionAlgorithm, CompressionPipeline};
use crate::config::Settings;
use crate::domain::ports::BackingStore;
use crate::error::{Error, Result};
use crate::retry::{Attempted, Exhausted, RetryPolicy};

// =============================================================================
// Configuration
// =============================================================================

/// Replication/read consistency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// Replicate in the background; failures are logged
    #[default]
    Eventual,
    /// Wait for every replica to acknowledge a write
    Strong,
    /// Reads pinned to the primary
    Session,
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyLevel::Eventual => write!(f, "eventual"),
            ConsistencyLevel::Strong => write!(f, "strong"),
            ConsistencyLevel::Session => write!(f, "session"),
        }
    }
}

/// Cache core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// First key segment
    pub prefix: String,
    /// Second key segment
    pub namespace: String,
    /// TTL applied when a write does not carry one
    pub ttl_seconds: u64,
    pub consistency_level: ConsistencyLevel,
    /// Copies kept per key, primary included
    pub replication_factor: u32,
    /// Convert unavailable/timed-out shards into misses and `false`
    pub failover: bool,
    /// Let eventual reads hit secondaries
    pub read_from_replicas: bool,
    /// Operation log capacity
    pub operation_log_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            prefix: "cache".to_string(),
            namespace: "default".to_string(),
            ttl_seconds: 3600,
            consistency_level: ConsistencyLevel::Eventual,
            replication_factor: 1,
            failover: false,
            read_from_replicas: false,
            operation_log_size: DEFAULT_OPERATION_LOG_CAPACITY,
        }
    }
}

impl CoreConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() || self.namespace.is_empty() {
            return Err(Error::Config("prefix and namespace must be non-empty".into()));
        }
        if self.prefix.contains(':') || self.namespace.contains(':') {
            return Err(Error::Config("prefix and namespace must not contain ':'".into()));
        }
        if self.replication_factor == 0 {
            return Err(Error::Config("replication_factor must be >= 1".into()));
        }
        if self.ttl_seconds == 0 {
            return Err(Error::Config("ttl_seconds must be > 0".into()));
        }
        Ok(())
    }
}

/// Per-call read overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub consistency: Option<ConsistencyLevel>,
    pub failover: Option<bool>,
}

/// Per-call write overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub ttl: Option<Duration>,
    pub consistency: Option<ConsistencyLevel>,
    /// Force an algorithm instead of the pipeline's choice
    pub algorithm: Option<CompressionAlgorithm>,
    pub failover: Option<bool>,
}

impl WriteOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }
}

/// Decode a cached value written by [`DistributedCache::set`]
pub fn decode_value<T: DeserializeOwned>(entry: &CacheEntry) -> Result<T> {
    Ok(serde_json::from_slice(&entry.value)?)
}

// =============================================================================
// Operation Bookkeeping
// =============================================================================

struct OpTimer {
    record: OperationRecord,
    start: Instant,
    shard: Arc<Shard>,
}

type ReplicaWrite = Arc<dyn Fn(Arc<dyn BackingStore>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

// =============================================================================
// Distributed Cache
// =============================================================================

/// Sharded cache core
pub struct DistributedCache {
    config: CoreConfig,
    router: Arc<ShardRouter>,
    stores: Arc<NodeStores>,
    pipeline: Arc<CompressionPipeline>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
    oplog: OperationLog,
    health: Arc<HealthMonitor>,
    /// Background replication
    tasks: TaskTracker,
    read_cursor: AtomicUsize,
}

impl DistributedCache {
    /// Build the core from settings and one store per configured node
    pub fn new(settings: &Settings, stores: NodeStores) -> Result<Self> {
        settings.validate()?;
        stores.check_covers(&settings.cluster)?;

        let router = Arc::new(ShardRouter::new(&settings.cluster)?);
        let stores = Arc::new(stores);
        let health = Arc::new(HealthMonitor::new(
            router.clone(),
            stores.clone(),
            &settings.cluster,
        ));

        Ok(Self {
            config: settings.cache.clone(),
            router,
            stores,
            pipeline: Arc::new(CompressionPipeline::new(settings.compression.clone())),
            retry: RetryPolicy::new(settings.retry.clone()),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(CacheMetrics::new()),
            oplog: OperationLog::new(settings.cache.operation_log_size),
            health,
            tasks: TaskTracker::new(),
            read_cursor: AtomicUsize::new(0),
        })
    }

    /// Replace the entry timestamp source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing pipeline (and its learned selector state)
    pub fn with_pipeline(mut self, pipeline: Arc<CompressionPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<ShardRouter> {
        &self.router
    }

    pub fn pipeline(&self) -> &Arc<CompressionPipeline> {
        &self.pipeline
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn operation_log(&self) -> &OperationLog {
        &self.oplog
    }

    /// `prefix:namespace:key`
    pub fn full_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.config.prefix, self.config.namespace, key)
    }

    fn key_prefix(&self) -> String {
        format!("{}:{}:", self.config.prefix, self.config.namespace)
    }

    /// Metrics including per-shard figures
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.shards = self
            .router
            .shards()
            .iter()
            .map(|s| ShardSnapshot {
                shard_id: s.id(),
                status: s.status(),
                metrics: s.metrics(),
            })
            .collect();
        snapshot
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the shard health loop
    pub fn start(&self) {
        info!(
            shards = self.router.shard_count(),
            prefix = %self.config.prefix,
            namespace = %self.config.namespace,
            consistency = %self.config.consistency_level,
            "Starting distributed cache"
        );
        self.health.start();
    }

    /// Stop the health loop and wait for background replication
    pub async fn stop(&self) {
        self.health.stop().await;
        self.tasks.close();
        self.tasks.wait().await;
        info!("Distributed cache stopped");
    }

    // -------------------------------------------------------------------------
    // Node Selection
    // -------------------------------------------------------------------------

    fn store_for(&self, node: &Node) -> Result<Arc<dyn BackingStore>> {
        Ok(self.stores.get(node.id())?.clone())
    }

    /// Nodes holding copies of a shard's keys, primary first
    fn copy_nodes<'a>(&self, shard: &'a Shard) -> &'a [Arc<Node>] {
        let copies = (self.config.replication_factor as usize).min(shard.nodes().len());
        &shard.nodes()[..copies.max(1)]
    }

    fn replica_stores(&self, shard: &Shard) -> Vec<(String, Arc<dyn BackingStore>)> {
        self.copy_nodes(shard)[1..]
            .iter()
            .filter_map(|node| match self.stores.get(node.id()) {
                Ok(store) => Some((node.id().to_string(), store.clone())),
                Err(e) => {
                    warn!(node = node.id(), "Skipping replica: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Node to read from under `consistency`
    fn read_node<'a>(&self, shard: &'a Shard, consistency: ConsistencyLevel) -> &'a Arc<Node> {
        let copies = self.copy_nodes(shard);
        if consistency != ConsistencyLevel::Eventual
            || !self.config.read_from_replicas
            || copies.len() == 1
        {
            return shard.primary();
        }
        let start = self.read_cursor.fetch_add(1, Ordering::Relaxed);
        (0..copies.len())
            .map(|i| &copies[(start + i) % copies.len()])
            .find(|n| n.status() == NodeStatus::Connected)
            .unwrap_or_else(|| shard.primary())
    }

    /// Shard for `full_key`, failing fast when it is offline
    fn operational_shard(&self, full_key: &str) -> Result<Arc<Shard>> {
        Ok(self.router.select_operational(full_key)?.clone())
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    fn begin(&self, op: OperationType, key: &str, full_key: &str) -> OpTimer {
        let shard = self.router.select_shard(full_key).clone();
        let mut record = OperationRecord::new(op, key, self.clock.now());
        record.metadata.shard_id = Some(shard.id());
        OpTimer {
            record,
            start: Instant::now(),
            shard,
        }
    }

    fn finish(&self, timer: OpTimer, outcome: Outcome, retries: u32, error: Option<&Error>) {
        let OpTimer {
            mut record,
            start,
            shard,
        } = timer;
        let latency = start.elapsed();

        let hit = match outcome {
            Outcome::Hit => Some(true),
            Outcome::Miss => Some(false),
            _ => None,
        };
        shard.record_operation(latency.as_secs_f64() * 1000.0, hit, outcome != Outcome::Error);
        self.metrics.record(record.op, latency, outcome);
        self.metrics.record_retries(retries);

        record.completed_at = self.clock.now();
        record.success = outcome != Outcome::Error;
        record.retry_count = retries;
        record.metadata.error = error.map(|e| e.to_string());
        self.oplog.push(record);
    }

    /// Surface `error`, or turn it into `fallback` under failover
    fn fail<T>(
        &self,
        timer: OpTimer,
        exhausted: Exhausted,
        failover: bool,
        fallback: T,
    ) -> Result<T> {
        let Exhausted { error, retries } = exhausted;
        if failover && error.is_failover_eligible() {
            self.metrics.record_failover();
            warn!(
                key = %timer.record.key,
                op = %timer.record.op,
                "Failover: {}",
                error
            );
            self.finish(timer, Outcome::Error, retries, Some(&error));
            return Ok(fallback);
        }
        self.finish(timer, Outcome::Error, retries, Some(&error));
        Err(error)
    }

    /// Apply a write to the shard's replicas
    async fn replicate(
        &self,
        consistency: ConsistencyLevel,
        op: &'static str,
        full_key: &str,
        replicas: Vec<(String, Arc<dyn BackingStore>)>,
        write: ReplicaWrite,
    ) -> Result<()> {
        if replicas.is_empty() {
            return Ok(());
        }

        if consistency == ConsistencyLevel::Strong {
            let acks = join_all(replicas.iter().map(|(id, store)| {
                let fut = write(store.clone());
                async move { (id, self.retry.attempt(op, fut).await) }
            }))
            .await;

            let mut failed = Vec::new();
            for (id, ack) in acks {
                if let Err(e) = ack {
                    self.metrics.record_replication_failure();
                    warn!(node = %id, key = full_key, op, "Replica did not acknowledge: {}", e);
                    failed.push(id.clone());
                }
            }
            if !failed.is_empty() {
                return Err(Error::Store(format!(
                    "{} of {} not acknowledged by replicas {:?}",
                    op, full_key, failed
                )));
            }
            return Ok(());
        }

        let metrics = self.metrics.clone();
        let timeout = self.retry.operation_timeout();
        let key = full_key.to_string();
        self.tasks.spawn(async move {
            for (id, store) in replicas {
                let result = match tokio::time::timeout(timeout, write(store)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        operation: op.to_string(),
                        timeout,
                    }),
                };
                if let Err(e) = result {
                    metrics.record_replication_failure();
                    warn!(node = %id, key = %key, op, "Replication failed: {}", e);
                }
            }
        });
        Ok(())
    }

    fn decode_entry(&self, raw: &Bytes) -> Result<(CacheEntry, bool)> {
        let envelope = Envelope::decode(raw)?;
        let value = self.pipeline.decompress_parts(
            envelope.algorithm,
            &envelope.payload,
            envelope.chunk_count,
            &envelope.checksum,
        )?;
        Ok((
            CacheEntry {
                value,
                cached_at: envelope.cached_at,
                expires_at: envelope.expires_at,
                version: envelope.version,
            },
            envelope.is_compressed(),
        ))
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read the raw entry for `key`
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.get_entry_with(key, &ReadOptions::default()).await
    }

    #[instrument(skip(self, opts))]
    pub async fn get_entry_with(&self, key: &str, opts: &ReadOptions) -> Result<Option<CacheEntry>> {
        let full = self.full_key(key);
        let mut timer = self.begin(OperationType::Get, key, &full);
        let consistency = opts.consistency.unwrap_or(self.config.consistency_level);
        let failover = opts.failover.unwrap_or(self.config.failover);

        let full_ref = full.as_str();
        let attempt = self
            .retry
            .run("get", move || async move {
                let shard = self.operational_shard(full_ref)?;
                let store = self.store_for(self.read_node(&shard, consistency))?;
                store.get(full_ref).await
            })
            .await;

        let Attempted { value: raw, retries } = match attempt {
            Ok(attempted) => attempted,
            Err(exhausted) => return self.fail(timer, exhausted, failover, None),
        };

        let Some(raw) = raw else {
            debug!("Cache miss");
            self.finish(timer, Outcome::Miss, retries, None);
            return Ok(None);
        };

        match self.decode_entry(&raw) {
            Ok((entry, compressed)) => {
                timer.record.metadata.size = Some(entry.value.len());
                timer.record.metadata.compressed = Some(compressed);
                debug!(size = entry.value.len(), compressed, "Cache hit");
                self.finish(timer, Outcome::Hit, retries, None);
                Ok(Some(entry))
            }
            Err(e) => {
                if matches!(e, Error::Integrity { .. }) {
                    self.metrics.record_integrity_failure();
                }
                warn!("Stored value unreadable: {}", e);
                self.finish(timer, Outcome::Error, retries, Some(&e));
                Err(e)
            }
        }
    }

    /// Read and deserialize `key`; expired entries read as absent
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_with(key, &ReadOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        key: &str,
        opts: &ReadOptions,
    ) -> Result<Option<T>> {
        match self.get_entry_with(key, opts).await? {
            Some(entry) if !entry.is_expired(self.clock.now()) => Ok(Some(decode_value(&entry)?)),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        let timer = self.begin(OperationType::Exists, key, &full);
        let consistency = self.config.consistency_level;

        let full_ref = full.as_str();
        let attempt = self
            .retry
            .run("exists", move || async move {
                let shard = self.operational_shard(full_ref)?;
                let store = self.store_for(self.read_node(&shard, consistency))?;
                store.exists(full_ref).await
            })
            .await;

        match attempt {
            Ok(Attempted { value, retries }) => {
                self.finish(timer, Outcome::Ok, retries, None);
                Ok(value)
            }
            Err(exhausted) => self.fail(timer, exhausted, self.config.failover, false),
        }
    }

    /// Batched read. A failing shard yields `None` for its keys only.
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn mget<T, K>(&self, keys: &[K]) -> Result<Vec<Option<T>>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let mut groups: BTreeMap<u32, Vec<(usize, String)>> = BTreeMap::new();
        for (index, key) in keys.iter().enumerate() {
            let full = self.full_key(key.as_ref());
            let shard_id = self.router.select_shard(&full).id();
            groups.entry(shard_id).or_default().push((index, full));
        }

        let batches = join_all(groups.into_values().map(|group| self.mget_shard(group))).await;

        let now = self.clock.now();
        let mut out: Vec<Option<T>> = keys.iter().map(|_| None).collect();
        for (index, raw) in batches.into_iter().flatten() {
            let Some(raw) = raw else { continue };
            let decoded = self
                .decode_entry(&raw)
                .and_then(|(entry, _)| {
                    if entry.is_expired(now) {
                        Ok(None)
                    } else {
                        decode_value(&entry).map(Some)
                    }
                });
            match decoded {
                Ok(value) => out[index] = value,
                Err(e) => {
                    if matches!(e, Error::Integrity { .. }) {
                        self.metrics.record_integrity_failure();
                    }
                    warn!(key = keys[index].as_ref(), "Dropping unreadable batch value: {}", e);
                }
            }
        }
        Ok(out)
    }

    async fn mget_shard(&self, group: Vec<(usize, String)>) -> Vec<(usize, Option<Bytes>)> {
        let first = &group[0].1;
        let mut timer = self.begin(OperationType::Get, first, first);
        timer.record.metadata.batch_size = Some(group.len());
        let consistency = self.config.consistency_level;

        let full_keys: Vec<String> = group.iter().map(|(_, k)| k.clone()).collect();
        let (keys_ref, first_ref) = (&full_keys, first.as_str());
        let attempt = self
            .retry
            .run("mget", move || async move {
                let shard = self.operational_shard(first_ref)?;
                let store = self.store_for(self.read_node(&shard, consistency))?;
                store.mget(keys_ref).await
            })
            .await;

        match attempt {
            Ok(Attempted { value, retries }) => {
                let hits = value.iter().filter(|v| v.is_some()).count();
                let outcome = if hits > 0 { Outcome::Hit } else { Outcome::Miss };
                self.finish(timer, outcome, retries, None);
                group
                    .into_iter()
                    .zip(value)
                    .map(|((index, _), raw)| (index, raw))
                    .collect()
            }
            Err(Exhausted { error, retries }) => {
                warn!(keys = group.len(), "Batch read failed, reporting misses: {}", error);
                self.finish(timer, Outcome::Error, retries, Some(&error));
                group.into_iter().map(|(index, _)| (index, None)).collect()
            }
        }
    }

    /// Local keys (without `prefix:namespace:`) matching `pattern` on every live shard
    #[instrument(skip(self))]
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = self.key_prefix();
        let full_pattern = format!("{}{}", prefix, pattern);

        let scans = join_all(self.router.shards().iter().map(|shard| {
            let full_pattern = full_pattern.as_str();
            async move {
                if !shard.status().is_operational() {
                    return Err(Error::ShardUnavailable { shard_id: shard.id() });
                }
                let store = self.store_for(shard.primary())?;
                self.retry
                    .attempt("keys", store.keys_by_pattern(full_pattern))
                    .await
            }
        }))
        .await;

        let mut keys = Vec::new();
        for (shard, scan) in self.router.shards().iter().zip(scans) {
            match scan {
                Ok(found) => keys.extend(
                    found
                        .into_iter()
                        .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string)),
                ),
                Err(e) if self.config.failover || e.is_failover_eligible() => {
                    warn!(shard = shard.id(), "Skipping shard in key scan: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Serialize and store `value` with the default TTL
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        self.set_with(key, value, &WriteOptions::default()).await
    }

    pub async fn set_with<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        opts: &WriteOptions,
    ) -> Result<bool> {
        let bytes = serde_json::to_vec(value)?;
        self.set_raw(key, Bytes::from(bytes), opts).await
    }

    /// Envelope for `value` cached now
    fn encode_value(&self, value: &[u8], ttl: Duration, algorithm: Option<CompressionAlgorithm>) -> Result<(Bytes, bool)> {
        let compressed = match algorithm {
            Some(algorithm) => self.pipeline.compress_with(value, Some(algorithm))?,
            None => self.pipeline.compress(value)?,
        };
        let now = self.clock.now();
        let envelope = Envelope::from_compressed(&compressed, now, add(now, ttl), ENTRY_VERSION);
        Ok((envelope.encode(), compressed.is_compressed()))
    }

    /// Store already-serialized bytes
    #[instrument(skip(self, value, opts), fields(size = value.len()))]
    pub async fn set_raw(&self, key: &str, value: Bytes, opts: &WriteOptions) -> Result<bool> {
        let full = self.full_key(key);
        let mut timer = self.begin(OperationType::Set, key, &full);
        let ttl = opts.ttl.unwrap_or_else(|| self.config.default_ttl());
        let consistency = opts.consistency.unwrap_or(self.config.consistency_level);
        let failover = opts.failover.unwrap_or(self.config.failover);
        timer.record.metadata.size = Some(value.len());

        let (raw, compressed) = match self.encode_value(&value, ttl, opts.algorithm) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.finish(timer, Outcome::Error, 0, Some(&e));
                return Err(e);
            }
        };
        timer.record.metadata.compressed = Some(compressed);

        let (full_ref, raw_ref) = (full.as_str(), &raw);
        let attempt = self
            .retry
            .run("set", move || async move {
                let shard = self.operational_shard(full_ref)?;
                let store = self.store_for(shard.primary())?;
                store.set(full_ref, raw_ref.clone(), Some(ttl)).await?;
                Ok(shard)
            })
            .await;

        let Attempted { value: shard, retries } = match attempt {
            Ok(attempted) => attempted,
            Err(exhausted) => return self.fail(timer, exhausted, failover, false),
        };

        let key_owned = full.clone();
        let write: ReplicaWrite = Arc::new(move |store: Arc<dyn BackingStore>| {
            let (key, raw) = (key_owned.clone(), raw.clone());
            async move { store.set(&key, raw, Some(ttl)).await }.boxed()
        });
        if let Err(e) = self
            .replicate(consistency, "set", &full, self.replica_stores(&shard), write)
            .await
        {
            self.finish(timer, Outcome::Error, retries, Some(&e));
            return Err(e);
        }

        self.finish(timer, Outcome::Ok, retries, None);
        Ok(true)
    }

    /// Batched write. Returns one success flag per pair.
    #[instrument(skip(self, pairs, opts), fields(pairs = pairs.len()))]
    pub async fn mset<T, K>(&self, pairs: &[(K, T)], opts: &WriteOptions) -> Result<Vec<bool>>
    where
        T: Serialize,
        K: AsRef<str>,
    {
        let ttl = opts.ttl.unwrap_or_else(|| self.config.default_ttl());
        let mut out = vec![false; pairs.len()];
        let mut groups: BTreeMap<u32, Vec<(usize, String, Bytes)>> = BTreeMap::new();

        for (index, (key, value)) in pairs.iter().enumerate() {
            let bytes = serde_json::to_vec(value)?;
            match self.encode_value(&bytes, ttl, opts.algorithm) {
                Ok((raw, _)) => {
                    let full = self.full_key(key.as_ref());
                    let shard_id = self.router.select_shard(&full).id();
                    groups.entry(shard_id).or_default().push((index, full, raw));
                }
                Err(e) => warn!(key = key.as_ref(), "Skipping batch value: {}", e),
            }
        }

        let consistency = opts.consistency.unwrap_or(self.config.consistency_level);
        let results = join_all(
            groups
                .into_values()
                .map(|group| self.mset_shard(group, ttl, consistency)),
        )
        .await;

        for (index, ok) in results.into_iter().flatten() {
            out[index] = ok;
        }
        Ok(out)
    }

    async fn mset_shard(
        &self,
        group: Vec<(usize, String, Bytes)>,
        ttl: Duration,
        consistency: ConsistencyLevel,
    ) -> Vec<(usize, bool)> {
        let first = group[0].1.clone();
        let mut timer = self.begin(OperationType::Set, &first, &first);
        timer.record.metadata.batch_size = Some(group.len());

        let pairs: Arc<Vec<(String, Bytes)>> = Arc::new(
            group
                .iter()
                .map(|(_, k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let (pairs_ref, first_ref) = (&pairs, first.as_str());
        let attempt = self
            .retry
            .run("mset", move || async move {
                let shard = self.operational_shard(first_ref)?;
                let store = self.store_for(shard.primary())?;
                store.mset(pairs_ref, Some(ttl)).await?;
                Ok(shard)
            })
            .await;

        let indices = group.iter().map(|(index, _, _)| *index);
        match attempt {
            Ok(Attempted { value: shard, retries }) => {
                let batch = pairs.clone();
                let write: ReplicaWrite = Arc::new(move |store: Arc<dyn BackingStore>| {
                    let batch = batch.clone();
                    async move { store.mset(&batch, Some(ttl)).await }.boxed()
                });
                let replicated = self
                    .replicate(consistency, "mset", &first, self.replica_stores(&shard), write)
                    .await;
                match replicated {
                    Ok(()) => {
                        self.finish(timer, Outcome::Ok, retries, None);
                        indices.map(|i| (i, true)).collect()
                    }
                    Err(e) => {
                        self.finish(timer, Outcome::Error, retries, Some(&e));
                        indices.map(|i| (i, false)).collect()
                    }
                }
            }
            Err(Exhausted { error, retries }) => {
                warn!(keys = group.len(), "Batch write failed: {}", error);
                self.finish(timer, Outcome::Error, retries, Some(&error));
                indices.map(|i| (i, false)).collect()
            }
        }
    }

    /// Remove `key`. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        let timer = self.begin(OperationType::Delete, key, &full);
        let consistency = self.config.consistency_level;

        let full_ref = full.as_str();
        let attempt = self
            .retry
            .run("delete", move || async move {
                let shard = self.operational_shard(full_ref)?;
                let store = self.store_for(shard.primary())?;
                let existed = store.delete(full_ref).await?;
                Ok((shard, existed))
            })
            .await;

        let Attempted {
            value: (shard, existed),
            retries,
        } = match attempt {
            Ok(attempted) => attempted,
            Err(exhausted) => return self.fail(timer, exhausted, self.config.failover, false),
        };

        let key_owned = full.clone();
        let write: ReplicaWrite = Arc::new(move |store: Arc<dyn BackingStore>| {
            let key = key_owned.clone();
            async move { store.delete(&key).await.map(|_| ()) }.boxed()
        });
        if let Err(e) = self
            .replicate(consistency, "delete", &full, self.replica_stores(&shard), write)
            .await
        {
            self.finish(timer, Outcome::Error, retries, Some(&e));
            return Err(e);
        }

        self.finish(timer, Outcome::Ok, retries, None);
        Ok(existed)
    }

    /// Reset the store TTL of `key`. Returns whether it existed.
    ///
    /// Only the backing store's expiry moves; the entry's recorded
    /// `expires_at` keeps describing the TTL it was written with.
    #[instrument(skip(self))]
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let full = self.full_key(key);
        let timer = self.begin(OperationType::Expire, key, &full);
        let consistency = self.config.consistency_level;

        let full_ref = full.as_str();
        let attempt = self
            .retry
            .run("expire", move || async move {
                let shard = self.operational_shard(full_ref)?;
                let store = self.store_for(shard.primary())?;
                let existed = store.expire(full_ref, ttl).await?;
                Ok((shard, existed))
            })
            .await;

        let Attempted {
            value: (shard, existed),
            retries,
        } = match attempt {
            Ok(attempted) => attempted,
            Err(exhausted) => return self.fail(timer, exhausted, self.config.failover, false),
        };

        let key_owned = full.clone();
        let write: ReplicaWrite = Arc::new(move |store: Arc<dyn BackingStore>| {
            let key = key_owned.clone();
            async move { store.expire(&key, ttl).await.map(|_| ()) }.boxed()
        });
        if let Err(e) = self
            .replicate(consistency, "expire", &full, self.replica_stores(&shard), write)
            .await
        {
            self.finish(timer, Outcome::Error, retries, Some(&e));
            return Err(e);
        }

        self.finish(timer, Outcome::Ok, retries, None);
        Ok(existed)
    }
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("config", &self.config)
            .field("shards", &self.router.shard_count())
            .field("stores", &self.stores)
            .finish()
    }
}
