//! Shard Health Monitor
//!
//! The only writer of shard and node status. Every interval it pings each
//! node with a bounded timeout:
//!
//! - primary unreachable → shard `offline`
//! - primary reachable, some secondary unreachable → shard `degraded`
//! - everything reachable → shard `active`, probe latency recorded
//!
//! Routing itself never changes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::ClusterConfig;
use super::router::{Node, NodeStatus, Shard, ShardRouter, ShardStatus};
use super::stores::NodeStores;

/// Outcome of probing one shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardHealth {
    pub shard_id: u32,
    pub status: ShardStatus,
    /// Primary probe latency (ms), when reachable
    pub latency_ms: Option<f64>,
    pub unreachable_nodes: Vec<String>,
}

/// Periodic liveness prober
pub struct HealthMonitor {
    router: Arc<ShardRouter>,
    stores: Arc<NodeStores>,
    interval: Duration,
    probe_timeout: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(router: Arc<ShardRouter>, stores: Arc<NodeStores>, config: &ClusterConfig) -> Self {
        Self {
            router,
            stores,
            interval: config.health_check_interval,
            probe_timeout: config.health_check_timeout,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Ping one node; `Some(latency_ms)` when it answered in time
    async fn probe_node(&self, node: &Node) -> Option<f64> {
        if node.status() == NodeStatus::Disconnected {
            node.set_status(NodeStatus::Reconnecting);
        }

        let store = match self.stores.get(node.id()) {
            Ok(store) => store,
            Err(e) => {
                warn!(node = node.id(), "Cannot probe node: {}", e);
                node.set_status(NodeStatus::Disconnected);
                return None;
            }
        };

        let start = Instant::now();
        match timeout(self.probe_timeout, store.ping()).await {
            Ok(Ok(())) => {
                node.set_status(NodeStatus::Connected);
                Some(start.elapsed().as_secs_f64() * 1000.0)
            }
            Ok(Err(e)) => {
                debug!(node = node.id(), "Probe failed: {}", e);
                node.set_status(NodeStatus::Disconnected);
                None
            }
            Err(_) => {
                debug!(node = node.id(), timeout = ?self.probe_timeout, "Probe timed out");
                node.set_status(NodeStatus::Disconnected);
                None
            }
        }
    }

    /// Probe a shard and update its status
    pub async fn check_shard(&self, shard: &Shard) -> ShardHealth {
        let previous = shard.status();
        let mut unreachable = Vec::new();

        let latency = self.probe_node(shard.primary()).await;
        if latency.is_none() {
            unreachable.push(shard.primary().id().to_string());
        }
        for node in shard.secondaries() {
            if self.probe_node(node).await.is_none() {
                unreachable.push(node.id().to_string());
            }
        }

        let status = match latency {
            None => ShardStatus::Offline,
            Some(_) if !unreachable.is_empty() => ShardStatus::Degraded,
            Some(_) => ShardStatus::Active,
        };
        shard.set_status(status);
        shard.record_probe(latency);

        if status != previous {
            match status {
                ShardStatus::Offline => warn!(
                    shard = shard.id(),
                    unreachable = ?unreachable,
                    "Shard went offline"
                ),
                ShardStatus::Degraded => warn!(
                    shard = shard.id(),
                    unreachable = ?unreachable,
                    "Shard degraded"
                ),
                ShardStatus::Active => info!(shard = shard.id(), "Shard active"),
            }
        }

        ShardHealth {
            shard_id: shard.id(),
            status,
            latency_ms: latency,
            unreachable_nodes: unreachable,
        }
    }

    /// One full probe pass over every shard
    #[instrument(skip(self))]
    pub async fn check_all(&self) -> Vec<ShardHealth> {
        let mut report = Vec::with_capacity(self.router.shard_count());
        for shard in self.router.shards() {
            report.push(self.check_shard(shard).await);
        }
        report
    }

    /// Spawn the background probe loop. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { monitor.run().await }));
    }

    async fn run(&self) {
        info!(
            interval = ?self.interval,
            shards = self.router.shard_count(),
            "Starting shard health monitor"
        );

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shard health monitor shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Health monitor task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some() && !self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;

    fn setup(
        shards: u32,
        nodes: u32,
    ) -> (
        Arc<ShardRouter>,
        HealthMonitor,
        std::collections::HashMap<String, Arc<InMemoryStore>>,
    ) {
        let config = ClusterConfig::uniform(shards, nodes);
        let router = Arc::new(ShardRouter::new(&config).unwrap());
        let (stores, handles) = NodeStores::in_memory(&config);
        let monitor = HealthMonitor::new(router.clone(), Arc::new(stores), &config);
        (router, monitor, handles)
    }

    #[tokio::test]
    async fn test_primary_down_marks_offline() {
        let (router, monitor, handles) = setup(2, 1);
        handles["shard-1-node-0"].set_offline(true);

        let report = monitor.check_all().await;
        assert_eq!(report[0].status, ShardStatus::Active);
        assert!(report[0].latency_ms.is_some());
        assert_eq!(report[1].status, ShardStatus::Offline);
        assert_eq!(router.shard(1).unwrap().status(), ShardStatus::Offline);
        assert_eq!(
            router.shard(1).unwrap().primary().status(),
            NodeStatus::Disconnected
        );

        // Recovery
        handles["shard-1-node-0"].set_offline(false);
        monitor.check_all().await;
        assert_eq!(router.shard(1).unwrap().status(), ShardStatus::Active);
        assert_eq!(
            router.shard(1).unwrap().primary().status(),
            NodeStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_secondary_down_marks_degraded() {
        let (router, monitor, handles) = setup(1, 3);
        handles["shard-0-node-2"].set_offline(true);

        let report = monitor.check_all().await;
        assert_eq!(report[0].status, ShardStatus::Degraded);
        assert_eq!(report[0].unreachable_nodes, vec!["shard-0-node-2".to_string()]);
        assert!(router.shard(0).unwrap().status().is_operational());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_primary_times_out() {
        let (router, monitor, handles) = setup(1, 1);
        handles["shard-0-node-0"].set_latency(Duration::from_secs(5));

        monitor.check_all().await;
        assert_eq!(router.shard(0).unwrap().status(), ShardStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_until_stopped() {
        let (router, monitor, handles) = setup(1, 1);
        let monitor = Arc::new(monitor);
        monitor.start();
        assert!(monitor.is_running());

        handles["shard-0-node-0"].set_offline(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(router.shard(0).unwrap().status(), ShardStatus::Offline);

        monitor.stop().await;
        assert!(!monitor.is_running());

        // No more probes after stop
        let pings = handles["shard-0-node-0"].counters().pings;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(handles["shard-0-node-0"].counters().pings, pings);
    }
}
