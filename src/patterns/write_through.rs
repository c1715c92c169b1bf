//! Write-through
//!
//! The source of truth is written first. The cache is only updated once the
//! source accepted the write, so it never runs ahead of the source.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{instrument, warn};

use super::{load_from_source, populate};
use crate::cache::{decode_value, DistributedCache, WriteOptions};
use crate::domain::DataSource;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Synchronous source-then-cache writes
pub struct WriteThrough<V>
where
    V: Send + Sync + 'static,
{
    cache: Arc<DistributedCache>,
    source: Arc<dyn DataSource<V>>,
    retry: RetryPolicy,
    _value: PhantomData<fn() -> V>,
}

impl<V> WriteThrough<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        cache: Arc<DistributedCache>,
        source: Arc<dyn DataSource<V>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cache,
            source,
            retry,
            _value: PhantomData,
        }
    }

    pub fn cache(&self) -> &Arc<DistributedCache> {
        &self.cache
    }

    /// Persist `value`, then cache it.
    ///
    /// Fails without touching the cache when the source rejects the write.
    /// Returns whether the cache write succeeded.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &V) -> Result<bool> {
        self.set_with(key, value, &WriteOptions::default()).await
    }

    #[instrument(skip(self, value, opts))]
    pub async fn set_with(&self, key: &str, value: &V, opts: &WriteOptions) -> Result<bool> {
        self.retry
            .run_any("save", || self.source.save(key, value))
            .await
            .map_err(Error::from)?;
        Ok(populate(&self.cache, key, value, opts).await)
    }

    /// Read the cache, loading and caching from the source on a miss
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        let now = self.cache.clock().now();
        match self.cache.get_entry(key).await {
            Ok(Some(entry)) if !entry.is_expired(now) => match decode_value(&entry) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => warn!("Cached value undecodable, reloading: {}", e),
            },
            Ok(_) => {}
            Err(e) => warn!("Cache read failed, falling back to source: {}", e),
        }

        let loaded = load_from_source(self.source.as_ref(), &self.retry, key).await?;
        if let Some(value) = &loaded {
            populate(&self.cache, key, value, &WriteOptions::default()).await;
        }
        Ok(loaded)
    }

    /// Delete from the source, then evict. Returns whether the source had it.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self
            .retry
            .run_any("delete", || self.source.delete(key))
            .await
            .map_err(Error::from)?
            .value;
        if let Err(e) = self.cache.delete(key).await {
            warn!("Cache eviction failed: {}", e);
        }
        Ok(existed)
    }
}
