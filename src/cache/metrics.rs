//! Cache Metrics
//!
//! Running totals for the cache core. Averages are incremental:
//! `avg = avg + (sample - avg) / count`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cluster::{ShardMetrics, ShardStatus};

/// Kind of core operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Get,
    Set,
    Delete,
    Exists,
    Expire,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Get,
        OperationType::Set,
        OperationType::Delete,
        OperationType::Exists,
        OperationType::Expire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Get => "get",
            OperationType::Set => "set",
            OperationType::Delete => "delete",
            OperationType::Exists => "exists",
            OperationType::Expire => "expire",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Read found a value
    Hit,
    /// Read found nothing
    Miss,
    /// Non-read succeeded
    Ok,
    Error,
}

/// Per-operation-type figures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
}

impl OperationStats {
    fn record(&mut self, latency_ms: f64, error: bool) {
        self.count += 1;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.count as f64;
        if error {
            self.errors += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Totals {
    overall: OperationStats,
    hits: u64,
    misses: u64,
    per_operation: [OperationStats; 5],
}

/// Cache core metrics
#[derive(Debug, Default)]
pub struct CacheMetrics {
    totals: Mutex<Totals>,
    retries: AtomicU64,
    failovers: AtomicU64,
    replication_failures: AtomicU64,
    integrity_failures: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished operation
    pub fn record(&self, op: OperationType, latency: Duration, outcome: Outcome) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let error = outcome == Outcome::Error;
        let mut totals = self.totals.lock();
        totals.overall.record(latency_ms, error);
        totals.per_operation[op.index()].record(latency_ms, error);
        match outcome {
            Outcome::Hit => totals.hits += 1,
            Outcome::Miss => totals.misses += 1,
            Outcome::Ok | Outcome::Error => {}
        }
    }

    pub fn record_retries(&self, retries: u32) {
        if retries > 0 {
            self.retries.fetch_add(retries as u64, Ordering::Relaxed);
        }
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replication_failure(&self) {
        self.replication_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// hits / (hits + misses)
    pub fn hit_rate(&self) -> f64 {
        let totals = self.totals.lock();
        ratio(totals.hits, totals.hits + totals.misses)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = self.totals.lock();
        let lookups = totals.hits + totals.misses;
        MetricsSnapshot {
            total_operations: totals.overall.count,
            errors: totals.overall.errors,
            hits: totals.hits,
            misses: totals.misses,
            hit_rate: ratio(totals.hits, lookups),
            miss_rate: ratio(totals.misses, lookups),
            avg_latency_ms: totals.overall.avg_latency_ms,
            per_operation: OperationType::ALL
                .iter()
                .map(|op| (op.as_str().to_string(), totals.per_operation[op.index()].clone()))
                .collect(),
            retries: self.retries.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            replication_failures: self.replication_failures.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            shards: Vec::new(),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Per-shard section of a [`MetricsSnapshot`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub shard_id: u32,
    pub status: ShardStatus,
    #[serde(flatten)]
    pub metrics: ShardMetrics,
}

/// Point-in-time copy of [`CacheMetrics`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_operations: u64,
    pub errors: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub avg_latency_ms: f64,
    pub per_operation: BTreeMap<String, OperationStats>,
    pub retries: u64,
    pub failovers: u64,
    pub replication_failures: u64,
    pub integrity_failures: u64,
    pub shards: Vec<ShardSnapshot>,
}
