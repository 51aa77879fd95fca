//! Item store trait.
//!
//! An item store is the raw key-value layer under the facade. It knows
//! nothing about namespaces, groups or the invalidation index; it stores
//! opaque [`CacheItem`]s with optional expiry.

use async_trait::async_trait;
use cairn_core::{CacheItem, CairnResult, SaveMode};

/// Pluggable key-value backend.
///
/// Implementations must be thread-safe. When several facades share one
/// store (or several processes share one backend), the store is the only
/// thing they have in common, so [`SaveMode::IfAbsent`] must be atomic.
///
/// # Expiry
///
/// An item whose `expires_at` has passed must behave exactly like an absent
/// item: `get_item` misses, `keys` omits it, and an `IfAbsent` save over it
/// succeeds.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Short backend name for logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Whether the backend is usable in this environment.
    fn is_supported(&self) -> bool {
        true
    }

    /// Fetch a live item.
    async fn get_item(&self, key: &str) -> CairnResult<Option<CacheItem>>;

    /// Fetch several live items. Missing keys are skipped.
    async fn get_items(&self, keys: &[String]) -> CairnResult<Vec<CacheItem>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.get_item(key).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Persist an item.
    ///
    /// Returns `false` only when `mode` is `IfAbsent` and a live item
    /// already exists under the key.
    async fn save(&self, item: CacheItem, mode: SaveMode) -> CairnResult<bool>;

    /// Remove an item. Removing an absent key is not an error.
    async fn delete_item(&self, key: &str) -> CairnResult<()>;

    /// Remove several items. Absent keys are ignored.
    async fn delete_items(&self, keys: &[String]) -> CairnResult<()> {
        for key in keys {
            self.delete_item(key).await?;
        }
        Ok(())
    }

    /// Keys of all live items in the store.
    async fn keys(&self) -> CairnResult<Vec<String>>;

    /// Physically remove expired items. Returns how many were removed.
    ///
    /// Backends with native expiry have nothing to do here.
    async fn purge_expired(&self) -> CairnResult<u64> {
        Ok(0)
    }

    /// Get store statistics.
    async fn stats(&self) -> CairnResult<CacheStats>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a live item.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of entries currently stored, expired ones included.
    pub entry_count: u64,
    /// Approximate stored size in bytes.
    pub memory_bytes: u64,
    /// Number of reads that hit an expired item.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
