//! Shard Router
//!
//! Maps fully-qualified keys onto a static set of shards. Routing never
//! changes at runtime; only shard and node liveness does, and that state is
//! written exclusively by the health monitor.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::config::ClusterConfig;
use crate::error::{Error, Result};

// =============================================================================
// Status Types
// =============================================================================

/// Shard liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    /// Primary and all secondaries reachable
    Active,
    /// Primary reachable, at least one secondary is not
    Degraded,
    /// Primary unreachable
    Offline,
}

impl ShardStatus {
    fn to_u8(self) -> u8 {
        match self {
            ShardStatus::Active => 0,
            ShardStatus::Degraded => 1,
            ShardStatus::Offline => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ShardStatus::Active,
            1 => ShardStatus::Degraded,
            _ => ShardStatus::Offline,
        }
    }

    /// Check if the shard can serve traffic
    pub fn is_operational(&self) -> bool {
        matches!(self, ShardStatus::Active | ShardStatus::Degraded)
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardStatus::Active => write!(f, "active"),
            ShardStatus::Degraded => write!(f, "degraded"),
            ShardStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Node role within its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Secondary,
}

/// Node connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

impl NodeStatus {
    fn to_u8(self) -> u8 {
        match self {
            NodeStatus::Connected => 0,
            NodeStatus::Disconnected => 1,
            NodeStatus::Reconnecting => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeStatus::Connected,
            1 => NodeStatus::Disconnected,
            _ => NodeStatus::Reconnecting,
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// A single backing-store instance
#[derive(Debug)]
pub struct Node {
    id: String,
    address: String,
    role: NodeRole,
    /// Owning shard (lookup only)
    shard_id: u32,
    status: AtomicU8,
}

impl Node {
    fn new(id: String, address: String, role: NodeRole, shard_id: u32) -> Self {
        Self {
            id,
            address,
            role,
            shard_id,
            status: AtomicU8::new(NodeStatus::Connected.to_u8()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: NodeStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }
}

// =============================================================================
// Shard
// =============================================================================

/// Rolling per-shard metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardMetrics {
    pub operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Incremental average of operation latency (ms)
    pub avg_latency_ms: f64,
    /// Latency of the last health probe (ms)
    pub last_probe_latency_ms: Option<f64>,
}

/// A partition of the keyspace
#[derive(Debug)]
pub struct Shard {
    id: u32,
    nodes: Vec<Arc<Node>>,
    status: AtomicU8,
    metrics: Mutex<ShardMetrics>,
}

impl Shard {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Node ids, primary first
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn primary(&self) -> &Arc<Node> {
        &self.nodes[0]
    }

    pub fn secondaries(&self) -> &[Arc<Node>] {
        &self.nodes[1..]
    }

    pub fn status(&self) -> ShardStatus {
        ShardStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ShardStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Record one served operation
    pub fn record_operation(&self, latency_ms: f64, hit: Option<bool>, success: bool) {
        let mut m = self.metrics.lock();
        m.operations += 1;
        m.avg_latency_ms += (latency_ms - m.avg_latency_ms) / m.operations as f64;
        match hit {
            Some(true) => m.hits += 1,
            Some(false) => m.misses += 1,
            None => {}
        }
        if !success {
            m.errors += 1;
        }
    }

    pub(crate) fn record_probe(&self, latency_ms: Option<f64>) {
        self.metrics.lock().last_probe_latency_ms = latency_ms;
    }

    pub fn metrics(&self) -> ShardMetrics {
        self.metrics.lock().clone()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Stable 32-bit rolling hash: `h = h * 31 + byte`, wrapped to i32, absolute value.
pub fn key_hash(key: &str) -> u32 {
    let mut hash: i32 = 0;
    for &byte in key.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as i32);
    }
    hash.unsigned_abs()
}

/// Deterministic key → shard mapping
#[derive(Debug)]
pub struct ShardRouter {
    shards: Vec<Arc<Shard>>,
}

impl ShardRouter {
    /// Build shards and nodes from static configuration
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        let shards = config
            .shards
            .iter()
            .map(|sc| {
                let nodes = sc
                    .nodes
                    .iter()
                    .enumerate()
                    .map(|(i, nc)| {
                        let role = if i == 0 {
                            NodeRole::Primary
                        } else {
                            NodeRole::Secondary
                        };
                        Arc::new(Node::new(nc.id.clone(), nc.address.clone(), role, sc.id))
                    })
                    .collect();
                Arc::new(Shard {
                    id: sc.id,
                    nodes,
                    status: AtomicU8::new(ShardStatus::Active.to_u8()),
                    metrics: Mutex::new(ShardMetrics::default()),
                })
            })
            .collect();

        Ok(Self { shards })
    }

    /// Pick the shard owning a fully-qualified key
    pub fn select_shard(&self, full_key: &str) -> &Arc<Shard> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let index = key_hash(full_key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Pick the shard and fail fast if it is offline
    pub fn select_operational(&self, full_key: &str) -> Result<&Arc<Shard>> {
        let shard = self.select_shard(full_key);
        if shard.status().is_operational() {
            Ok(shard)
        } else {
            Err(Error::ShardUnavailable { shard_id: shard.id })
        }
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn shard(&self, id: u32) -> Option<&Arc<Shard>> {
        self.shards.iter().find(|s| s.id == id)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Mark a shard's status (health monitor and tests)
    pub fn mark_shard(&self, id: u32, status: ShardStatus) -> bool {
        match self.shard(id) {
            Some(shard) => {
                shard.set_status(status);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::config::{NodeConfig, ShardConfig};

    #[test]
    fn test_key_hash_is_stable() {
        // Fixed expectations guard against accidental salting or algorithm drift
        assert_eq!(key_hash(""), 0);
        assert_eq!(key_hash("a"), 97);
        assert_eq!(key_hash("ab"), 97 * 31 + 98);
        assert_eq!(key_hash("cache:default:user:42"), key_hash("cache:default:user:42"));
    }

    #[test]
    fn test_key_hash_wraps() {
        // Long keys overflow i32 and must still produce a value
        let long = "x".repeat(10_000);
        let _ = key_hash(&long);
    }

    #[test]
    fn test_single_shard_mode() {
        let router = ShardRouter::new(&ClusterConfig::default()).unwrap();
        for key in ["a", "b", "cache:ns:zzz"] {
            assert_eq!(router.select_shard(key).id(), 0);
        }
    }

    #[test]
    fn test_routing_determinism_and_spread() {
        let router = ShardRouter::new(&ClusterConfig::uniform(4, 1)).unwrap();
        let mut counts = [0usize; 4];
        for i in 0..4000 {
            let key = format!("cache:default:key-{}", i);
            let first = router.select_shard(&key).id();
            assert_eq!(router.select_shard(&key).id(), first);
            counts[first as usize] += 1;
        }
        assert!(counts.iter().all(|c| *c > 500), "uneven spread: {:?}", counts);
    }

    #[test]
    fn test_routing_matches_hash_formula() {
        let router = ShardRouter::new(&ClusterConfig::uniform(3, 1)).unwrap();
        let key = "cache:default:k";
        let expected = key_hash(key) % 3;
        assert_eq!(router.select_shard(key).id(), expected);
    }

    #[test]
    fn test_offline_shard_rejected() {
        let router = ShardRouter::new(&ClusterConfig::uniform(3, 1)).unwrap();
        let key = "cache:default:k";
        let id = router.select_shard(key).id();
        router.mark_shard(id, ShardStatus::Offline);
        assert!(matches!(
            router.select_operational(key),
            Err(Error::ShardUnavailable { shard_id }) if shard_id == id
        ));
        router.mark_shard(id, ShardStatus::Degraded);
        assert!(router.select_operational(key).is_ok());
    }

    #[test]
    fn test_node_roles() {
        let config = ClusterConfig {
            shards: vec![ShardConfig {
                id: 7,
                nodes: vec![
                    NodeConfig::new("p", "memory://p"),
                    NodeConfig::new("s1", "memory://s1"),
                ],
            }],
            ..Default::default()
        };
        let router = ShardRouter::new(&config).unwrap();
        let shard = router.shard(7).unwrap();
        assert_eq!(shard.primary().role(), NodeRole::Primary);
        assert_eq!(shard.secondaries()[0].role(), NodeRole::Secondary);
        assert_eq!(shard.secondaries()[0].shard_id(), 7);
        assert_eq!(shard.node_ids(), vec!["p", "s1"]);
    }

    #[test]
    fn test_shard_metrics_incremental_average() {
        let router = ShardRouter::new(&ClusterConfig::default()).unwrap();
        let shard = router.select_shard("k");
        shard.record_operation(10.0, Some(true), true);
        shard.record_operation(20.0, Some(false), true);
        shard.record_operation(30.0, None, false);
        let m = shard.metrics();
        assert_eq!(m.operations, 3);
        assert_eq!((m.hits, m.misses, m.errors), (1, 1, 1));
        assert!((m.avg_latency_ms - 20.0).abs() < 1e-9);
    }
}
