//! Distributed Cache
//!
//! Sharded key/value cache over pluggable backing stores. Values are
//! serialized, compressed by the [`crate::compression`] pipeline and
//! wrapped in a checksummed envelope before they reach a node.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        DistributedCache                            │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌───────────────┐   ┌───────────────────────┐  │
//! │  │ ShardRouter  │   │ Compression   │   │ RetryPolicy           │  │
//! │  │ (key hash →  │   │ Pipeline +    │   │ (timeout + backoff,   │  │
//! │  │  shard)      │   │ Envelope      │   │  failover)            │  │
//! │  └──────┬───────┘   └───────────────┘   └───────────────────────┘  │
//! │         │                                                          │
//! │  ┌──────▼───────┐   ┌───────────────┐   ┌───────────────────────┐  │
//! │  │ NodeStores   │◀──│ HealthMonitor │   │ CacheMetrics +        │  │
//! │  │ (one per     │   │ (ACTIVE /     │   │ OperationLog          │  │
//! │  │  node)       │   │  DEGRADED /   │   │                       │  │
//! │  └──────────────┘   │  OFFLINE)     │   └───────────────────────┘  │
//! │                     └───────────────┘                              │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use couchecache::cache::DistributedCache;
//! use couchecache::cluster::NodeStores;
//! use couchecache::config::Settings;
//!
//! # tokio_test::block_on(async {
//! let settings = Settings::default();
//! let (stores, _) = NodeStores::in_memory(&settings.cluster);
//! let cache = DistributedCache::new(&settings, stores).unwrap();
//!
//! cache.set("greeting", "hello").await.unwrap();
//! let value: Option<String> = cache.get("greeting").await.unwrap();
//! assert_eq!(value.as_deref(), Some("hello"));
//! # });
//! ```

mod clock;
mod core;
mod entry;
mod envelope;
mod metrics;
mod oplog;

pub use clock::{Clock, SystemClock, TokioClock};
pub use self::core::{
    decode_value, ConsistencyLevel, CoreConfig, DistributedCache, ReadOptions, WriteOptions,
};
pub use entry::{CacheEntry, Freshness, ENTRY_VERSION};
pub use envelope::{Envelope, FLAG_CHUNKED, HEADER_LEN, MAGIC};
pub use metrics::{
    CacheMetrics, MetricsSnapshot, OperationStats, OperationType, Outcome, ShardSnapshot,
};
pub use oplog::{
    OperationLog, OperationMetadata, OperationRecord, DEFAULT_OPERATION_LOG_CAPACITY,
};
