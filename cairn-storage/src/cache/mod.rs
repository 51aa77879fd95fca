//! Namespaced cache with group-based invalidation.
//!
//! Backends only have to store, fetch and delete single items with an
//! expiry, plus one atomic "write if absent". On top of that this module
//! builds:
//!
//! - **Namespacing**: every key is a [`NamespacedKey`](cairn_core::NamespacedKey),
//!   so several applications can share one physical store.
//! - **Group invalidation**: an [`InvalidationIndex`] per namespace records
//!   every key written, so [`Cache::clean`] can delete a whole group on
//!   backends without prefix deletion.
//! - **Index locking**: an [`IndexLock`] sentinel item serializes index
//!   updates across tasks and processes sharing the store.
//!
//! # Backends
//!
//! | name     | type                | shared across processes |
//! |----------|---------------------|-------------------------|
//! | `memory` | [`MemoryItemStore`] | no                      |
//! | `file`   | [`LmdbItemStore`]   | yes                     |
//! | `redis`  | `RedisItemStore` (feature `redis`) | yes      |
//! | `none`   | [`NullItemStore`]   | n/a                     |

mod envelope;
pub mod facade;
pub mod index_lock;
pub mod invalidation_index;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod null_backend;
pub mod provider;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod traits;

pub use facade::{Cache, CleanMode};
pub use index_lock::IndexLock;
pub use invalidation_index::{InvalidationIndex, KeySet};
pub use lmdb_backend::{LmdbItemStore, LmdbStoreError};
pub use memory_backend::MemoryItemStore;
pub use null_backend::NullItemStore;
pub use provider::open_store;
#[cfg(feature = "redis")]
pub use redis_backend::RedisItemStore;
pub use traits::{CacheStats, ItemStore};
