//! In-process item store.
//!
//! Items live in a map guarded by an async `RwLock`. Sharing one
//! `Arc<MemoryItemStore>` between facades gives them the same view of the
//! data, which is how concurrent writers are exercised in tests.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use cairn_core::{CacheItem, CairnResult, SaveMode};
use chrono::Utc;
use tokio::sync::RwLock;

use super::traits::{CacheStats, ItemStore};

/// Map-backed [`ItemStore`].
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: RwLock<HashMap<String, CacheItem>>,
    stats: StdRwLock<CacheStats>,
}

impl MemoryItemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self, expired: bool) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
            if expired {
                stats.expirations += 1;
            }
        }
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_item(&self, key: &str) -> CairnResult<Option<CacheItem>> {
        let items = self.items.read().await;
        match items.get(key) {
            Some(item) if !item.is_expired(Utc::now()) => {
                self.record_hit();
                Ok(Some(item.clone()))
            }
            Some(_) => {
                self.record_miss(true);
                Ok(None)
            }
            None => {
                self.record_miss(false);
                Ok(None)
            }
        }
    }

    async fn save(&self, item: CacheItem, mode: SaveMode) -> CairnResult<bool> {
        let mut items = self.items.write().await;

        if mode == SaveMode::IfAbsent {
            let occupied = items
                .get(&item.key)
                .is_some_and(|existing| !existing.is_expired(Utc::now()));
            if occupied {
                return Ok(false);
            }
        }

        items.insert(item.key.clone(), item);
        Ok(true)
    }

    async fn delete_item(&self, key: &str) -> CairnResult<()> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn delete_items(&self, keys: &[String]) -> CairnResult<()> {
        let mut items = self.items.write().await;
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }

    async fn keys(&self) -> CairnResult<Vec<String>> {
        let now = Utc::now();
        Ok(self
            .items
            .read()
            .await
            .values()
            .filter(|item| !item.is_expired(now))
            .map(|item| item.key.clone())
            .collect())
    }

    async fn purge_expired(&self) -> CairnResult<u64> {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| !item.is_expired(now));
        Ok((before - items.len()) as u64)
    }

    async fn stats(&self) -> CairnResult<CacheStats> {
        let (entry_count, memory_bytes) = {
            let items = self.items.read().await;
            let bytes: usize = items.values().map(|i| i.key.len() + i.value.len()).sum();
            (items.len() as u64, bytes as u64)
        };

        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}
