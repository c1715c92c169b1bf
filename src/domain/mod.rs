//! Domain Layer
//!
//! Port traits for the collaborators the cache layer calls into.
//!
//! - **Ports** (`ports.rs`) - [`BackingStore`] and [`DataSource`]
//!
//! # Usage
//!
//! ```ignore
//! use couchecache::domain::{BackingStore, DataSource};
//!
//! // Depend on the traits, inject adapters
//! async fn warm<S, D>(store: &S, source: &D, key: &str) -> Result<()>
//! where
//!     S: BackingStore,
//!     D: DataSource<Vec<u8>>,
//! {
//!     if let Some(v) = source.load(key).await? {
//!         store.set(key, v.into(), None).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod ports;

pub use ports::{BackingStore, DataSource};
