//! Item store that stores nothing.
//!
//! Selected with the `none` adapter to switch caching off without touching
//! call sites. Every write reports success and every read misses, so the
//! facade keeps working and simply never hits.

use async_trait::async_trait;
use cairn_core::{CacheItem, CairnResult, SaveMode};

use super::traits::{CacheStats, ItemStore};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullItemStore;

#[async_trait]
impl ItemStore for NullItemStore {
    fn backend_name(&self) -> &'static str {
        "none"
    }

    async fn get_item(&self, _key: &str) -> CairnResult<Option<CacheItem>> {
        Ok(None)
    }

    // Nothing is ever held, so conditional writes always win.
    async fn save(&self, _item: CacheItem, _mode: SaveMode) -> CairnResult<bool> {
        Ok(true)
    }

    async fn delete_item(&self, _key: &str) -> CairnResult<()> {
        Ok(())
    }

    async fn keys(&self) -> CairnResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn stats(&self) -> CairnResult<CacheStats> {
        Ok(CacheStats::default())
    }
}
