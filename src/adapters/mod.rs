//! Port Adapters
//!
//! In-process implementations of [`BackingStore`](crate::domain::BackingStore)
//! and [`DataSource`](crate::domain::DataSource). The demo binary and the
//! test suites run whole clusters on them.
//!
//! ```text
//!   DistributedCache ──▶ BackingStore ◀── InMemoryStore (one per node)
//!   access patterns  ──▶ DataSource<V> ◀── InMemoryDataSource<V>
//! ```
//!
//! Both adapters carry fault hooks (offline switch, injected latency,
//! failing calls) for exercising failover and retry paths.
//!
//! ```ignore
//! use couchecache::adapters::InMemoryStore;
//! use couchecache::domain::BackingStore;
//!
//! let store = InMemoryStore::new("node-0");
//! store.set("cache:default:k", Bytes::from_static(b"v"), None).await?;
//! store.set_offline(true);
//! ```

mod memory;

pub use memory::{
    glob_to_regex, InMemoryDataSource, InMemoryStore, SourceCounters, StoreCounters,
};
