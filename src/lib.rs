//! CoucheCache - Sharded Distributed Cache Layer
//!
//! A cache layer over pluggable key-value stores with adaptive compression,
//! deterministic shard routing and four access patterns (cache-aside,
//! write-through, write-behind, refresh-ahead).
//!
//! # Architecture
//!
//! ```text
//!   Access patterns  ──▶  DistributedCache  ──▶  ShardRouter  ──▶  BackingStore (per node)
//!         │                      │
//!         ▼                      ▼
//!    DataSource<V>      CompressionPipeline
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - In-memory implementations of the domain ports
//! - [`cache`] - Cache core, entries, stored envelope, metrics, operation log
//! - [`cluster`] - Shards, nodes, routing and health monitoring
//! - [`compression`] - Adaptive compression pipeline
//! - [`config`] - Typed configuration and overrides
//! - [`domain`] - Port traits for backing stores and data sources
//! - [`error`] - Error types
//! - [`patterns`] - Cache access patterns and the refresh scheduler
//! - [`retry`] - Bounded retry with exponential backoff

pub mod adapters;
pub mod cache;
pub mod cluster;
pub mod compression;
pub mod config;
pub mod domain;
pub mod error;
pub mod patterns;
pub mod retry;

// Re-export commonly used types
pub use cache::{ConsistencyLevel, DistributedCache, ReadOptions, WriteOptions};
pub use cluster::{ClusterConfig, NodeStores, ShardRouter, ShardStatus};
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionPipeline};
pub use config::{ConfigOverrides, Settings};
pub use domain::{BackingStore, DataSource};
pub use error::{Error, Result};
pub use patterns::{CacheAside, PatternConfig, RefreshAhead, WriteBehind, WriteThrough};
pub use retry::{RetryConfig, RetryPolicy};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
