//! Static cluster topology

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One backing-store instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub id: String,
    pub address: String,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// One shard; the first node is the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardConfig {
    pub id: u32,
    pub nodes: Vec<NodeConfig>,
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub shards: Vec<ShardConfig>,
    /// Interval between liveness probes
    #[serde(with = "duration_millis", rename = "health_check_interval_ms")]
    pub health_check_interval: Duration,
    /// Deadline for a single liveness probe
    #[serde(with = "duration_millis", rename = "health_check_timeout_ms")]
    pub health_check_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shards: vec![ShardConfig {
                id: 0,
                nodes: vec![NodeConfig::new("node-0", "memory://node-0")],
            }],
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(1),
        }
    }
}

impl ClusterConfig {
    /// `shard_count` shards with `nodes_per_shard` in-memory nodes each.
    ///
    /// Node ids are `shard-{s}-node-{n}`; node 0 is the primary.
    pub fn uniform(shard_count: u32, nodes_per_shard: u32) -> Self {
        let shards = (0..shard_count)
            .map(|s| ShardConfig {
                id: s,
                nodes: (0..nodes_per_shard.max(1))
                    .map(|n| {
                        let id = format!("shard-{}-node-{}", s, n);
                        let address = format!("memory://{}", id);
                        NodeConfig::new(id, address)
                    })
                    .collect(),
            })
            .collect();
        Self {
            shards,
            ..Default::default()
        }
    }

    /// Every node id in the topology
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.shards
            .iter()
            .flat_map(|s| s.nodes.iter().map(|n| n.id.as_str()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(Error::Config("cluster must define at least one shard".into()));
        }
        let mut shard_ids = HashSet::new();
        let mut node_ids = HashSet::new();
        for shard in &self.shards {
            if !shard_ids.insert(shard.id) {
                return Err(Error::Config(format!("duplicate shard id {}", shard.id)));
            }
            if shard.nodes.is_empty() {
                return Err(Error::Config(format!("shard {} has no nodes", shard.id)));
            }
            for node in &shard.nodes {
                if !node_ids.insert(node.id.as_str()) {
                    return Err(Error::Config(format!("duplicate node id {}", node.id)));
                }
            }
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::Config("health_check_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Serde helper for `Duration` stored as whole milliseconds
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
