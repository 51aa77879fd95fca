//! CAIRN Storage - Cache Facade and Item Stores
//!
//! The facade, its invalidation index and index lock, and the pluggable
//! item store backends they run on. Data types, configuration and errors
//! live in `cairn-core`.

pub mod cache;

pub use cache::{
    open_store, Cache, CacheStats, CleanMode, IndexLock, InvalidationIndex, ItemStore, KeySet,
    LmdbItemStore, LmdbStoreError, MemoryItemStore, NullItemStore,
};
#[cfg(feature = "redis")]
pub use cache::RedisItemStore;
