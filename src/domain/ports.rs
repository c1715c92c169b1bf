//! Domain Ports (Port/Adapter Pattern)
//!
//! The cache layer orchestrates calls to two external collaborators and
//! depends only on the traits below. Adapters provide the implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Cache Layer                               │
//! │  DistributedCache ──────────▶ BackingStore (per node)       │
//! │  Access patterns  ──────────▶ DataSource<V> (per pattern)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  InMemoryStore │ InMemoryDataSource │ (network stores, DBs) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All keys handed to a [`BackingStore`] are fully qualified
//! (`prefix:namespace:key`). [`DataSource`] sees the caller's local key.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

// =============================================================================
// Backing Store Port
// =============================================================================

/// Primitive key-value operations of one backing-store node.
///
/// The store owns expiry: a value written with a TTL disappears on its own
/// once the TTL lapses.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;

    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Remove a value. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check for a live value
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Reset the TTL of an existing value. Returns whether it existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Batched read, one slot per requested key
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Batched write sharing one TTL
    async fn mset(&self, pairs: &[(String, Bytes)], ttl: Option<Duration>) -> Result<()>;

    /// Scan keys matching a glob (`*`, `?`)
    async fn keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Data Source Port
// =============================================================================

/// Source of truth behind an access pattern.
///
/// Only `load` is mandatory; read-only sources keep the default `save` and
/// `delete`, which fail with [`Error::DataSource`].
#[async_trait]
pub trait DataSource<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Load the authoritative value for `key`
    async fn load(&self, key: &str) -> Result<Option<V>>;

    /// Persist a value
    async fn save(&self, key: &str, _value: &V) -> Result<()> {
        Err(Error::DataSource(format!(
            "save not supported by this data source (key {})",
            key
        )))
    }

    /// Remove a value. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool> {
        Err(Error::DataSource(format!(
            "delete not supported by this data source (key {})",
            key
        )))
    }
}
