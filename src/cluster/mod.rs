//! Cluster Topology
//!
//! Static shard/node layout, deterministic key routing and liveness
//! tracking.
//!
//! ```text
//! fullKey ──▶ ShardRouter::select_shard ──▶ Shard { primary, secondaries }
//!                                                 ▲
//!                        HealthMonitor (interval) ┘  status: active/degraded/offline
//! ```
//!
//! Shard status has a single writer (the [`HealthMonitor`]) and many readers,
//! so it lives in atomics rather than behind a lock.

mod config;
mod health;
mod router;
mod stores;

pub(crate) use config::duration_millis;
pub use config::{ClusterConfig, NodeConfig, ShardConfig};
pub use health::{HealthMonitor, ShardHealth};
pub use router::{
    key_hash, Node, NodeRole, NodeStatus, Shard, ShardMetrics, ShardRouter, ShardStatus,
};
pub use stores::NodeStores;
