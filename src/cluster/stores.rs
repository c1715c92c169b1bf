//! Node id → backing-store handle registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::InMemoryStore;
use crate::domain::ports::BackingStore;
use crate::error::{Error, Result};

use super::config::ClusterConfig;

/// Backing-store connection per node, shared by the core and the health monitor
#[derive(Clone, Default)]
pub struct NodeStores {
    stores: HashMap<String, Arc<dyn BackingStore>>,
}

impl NodeStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's store
    pub fn insert(&mut self, node_id: impl Into<String>, store: Arc<dyn BackingStore>) {
        self.stores.insert(node_id.into(), store);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, node_id: impl Into<String>, store: Arc<dyn BackingStore>) -> Self {
        self.insert(node_id, store);
        self
    }

    pub fn get(&self, node_id: &str) -> Result<&Arc<dyn BackingStore>> {
        self.stores
            .get(node_id)
            .ok_or_else(|| Error::Internal(format!("no backing store registered for node {}", node_id)))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Fail unless every configured node has a store
    pub fn check_covers(&self, config: &ClusterConfig) -> Result<()> {
        for id in config.node_ids() {
            self.get(id)?;
        }
        Ok(())
    }

    /// One [`InMemoryStore`] per configured node.
    ///
    /// Returns the typed handles too so callers can inject faults.
    pub fn in_memory(config: &ClusterConfig) -> (Self, HashMap<String, Arc<InMemoryStore>>) {
        let mut stores = Self::new();
        let mut handles = HashMap::new();
        for id in config.node_ids() {
            let store = Arc::new(InMemoryStore::new(id));
            stores.insert(id, store.clone() as Arc<dyn BackingStore>);
            handles.insert(id.to_string(), store);
        }
        (stores, handles)
    }
}

impl std::fmt::Debug for NodeStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.stores.keys().collect();
        ids.sort();
        f.debug_struct("NodeStores").field("nodes", &ids).finish()
    }
}
