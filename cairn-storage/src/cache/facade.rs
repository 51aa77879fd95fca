//! The public cache facade.
//!
//! A [`Cache`] is bound to one namespace of one item store. Reads go straight
//! to the store. Every mutation runs as a critical section under the
//! namespace's index lock, so the invalidation index stays in step with the
//! data keys even when many tasks or processes share the backend.
//!
//! # Example
//!
//! ```ignore
//! let cache = Cache::open(&CacheConfig::new(BackendKind::Memory).with_namespace("shop")).await?;
//!
//! cache.set(&product, "sku-42", Some("products"), None).await?;
//! let hit: Option<Product> = cache.get("sku-42", Some("products")).await?;
//!
//! // Drop everything in the group, whatever the backend supports natively
//! cache.clean("products", CleanMode::Group).await?;
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cairn_core::{
    CacheConfig, CacheItem, CairnError, CairnResult, Held, IndexLease, NamespacedKey, SaveMode,
    StorageError,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::index_lock::IndexLock;
use super::invalidation_index::{InvalidationIndex, KeySet};
use super::provider;
use super::traits::{CacheStats, ItemStore};

// ============================================================================
// CLEAN MODE
// ============================================================================

/// Which side of a group [`Cache::clean`] deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanMode {
    /// Delete the keys of the group.
    Group,
    /// Delete every key of the namespace except the group's.
    NotGroup,
}

impl CleanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanMode::Group => "group",
            CleanMode::NotGroup => "notgroup",
        }
    }

    /// Map a mode name. Only `"group"` selects [`CleanMode::Group`]; any
    /// other string, unknown ones included, means [`CleanMode::NotGroup`].
    pub fn from_name(name: &str) -> Self {
        if name == "group" {
            CleanMode::Group
        } else {
            CleanMode::NotGroup
        }
    }

    /// Whether `in_group` keys are deleted under this mode.
    fn selects(self, in_group: bool) -> bool {
        in_group == (self == CleanMode::Group)
    }
}

impl FromStr for CleanMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for CleanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Namespaced cache with group invalidation over an [`ItemStore`].
pub struct Cache<S: ItemStore + ?Sized = dyn ItemStore> {
    store: Arc<S>,
    namespace: String,
    default_group: String,
    default_ttl: Duration,
    lock: IndexLock,
    index: InvalidationIndex,
}

impl<S: ItemStore + ?Sized> Clone for Cache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            default_group: self.default_group.clone(),
            default_ttl: self.default_ttl,
            lock: self.lock.clone(),
            index: self.index.clone(),
        }
    }
}

impl<S: ItemStore + ?Sized> fmt::Debug for Cache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.store.backend_name())
            .field("namespace", &self.namespace)
            .field("default_group", &self.default_group)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Cache<dyn ItemStore> {
    /// Open the backend named by `config` and bind a facade to it.
    ///
    /// Fails with a configuration error for an unsupported or unavailable
    /// backend; no facade exists without one.
    pub async fn open(config: &CacheConfig) -> CairnResult<Self> {
        let store = provider::open_store(config).await?;
        Self::new(store, config)
    }
}

impl<S: ItemStore + ?Sized> Cache<S> {
    /// Bind a facade to an existing store.
    pub fn new(store: Arc<S>, config: &CacheConfig) -> CairnResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            namespace: config.namespace.clone(),
            default_group: config.default_group.clone(),
            default_ttl: config.default_ttl,
            lock: IndexLock::new(config.namespace.as_str(), config.lock.clone()),
            index: InvalidationIndex::new(config.namespace.as_str()),
        })
    }

    /// The namespace (context) this facade writes into.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// A facade over the same store bound to another namespace.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            store: Arc::clone(&self.store),
            default_group: self.default_group.clone(),
            default_ttl: self.default_ttl,
            lock: IndexLock::new(namespace.as_str(), self.lock.config().clone()),
            index: InvalidationIndex::new(namespace.as_str()),
            namespace,
        }
    }

    fn key_for(&self, identifier: &str, group: Option<&str>) -> String {
        let group = group.unwrap_or(&self.default_group);
        NamespacedKey::new(self.namespace.as_str(), group, identifier).encode()
    }

    // ------------------------------------------------------------------------
    // Reads (never locked)
    // ------------------------------------------------------------------------

    /// Fetch a value. `Ok(None)` is a miss, distinct from any stored value.
    pub async fn get<T: DeserializeOwned>(
        &self,
        identifier: &str,
        group: Option<&str>,
    ) -> CairnResult<Option<T>> {
        let key = self.key_for(identifier, group);
        match self.store.get_item(&key).await? {
            Some(item) => item.decode_value().map(Some),
            None => Ok(None),
        }
    }

    /// Every item the backend reports, decoded as JSON.
    ///
    /// For introspection. This is a raw enumeration of the store, not of the
    /// index, and includes other namespaces and the reserved index and lock
    /// items. Values that are not JSON are skipped.
    pub async fn get_all(&self) -> CairnResult<HashMap<String, serde_json::Value>> {
        let keys = self.store.keys().await?;
        let items = self.store.get_items(&keys).await?;

        let mut values = HashMap::with_capacity(items.len());
        for item in items {
            match item.decode_value::<serde_json::Value>() {
                Ok(value) => {
                    values.insert(item.key, value);
                }
                Err(e) => debug!(key = %item.key, error = %e, "skipping non-JSON item"),
            }
        }
        Ok(values)
    }

    // ------------------------------------------------------------------------
    // Mutations (index lock held)
    // ------------------------------------------------------------------------

    /// Store `value` under `identifier` in `group` (default group if `None`)
    /// for `ttl` (default TTL if `None`; zero means no expiry).
    ///
    /// Nothing is written if the index lock cannot be acquired.
    pub async fn set<T: Serialize + ?Sized + Sync>(
        &self,
        value: &T,
        identifier: &str,
        group: Option<&str>,
        ttl: Option<Duration>,
    ) -> CairnResult<()> {
        let key = self.key_for(identifier, group);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let item = CacheItem::from_json(key.as_str(), value)?;

        let lease = self.lock.acquire(&*self.store).await?;
        let result = self.set_locked(&lease, item, ttl).await;
        self.release(lease, result).await?;

        debug!(namespace = %self.namespace, key = %key, ttl_s = ttl.as_secs(), "cache set");
        Ok(())
    }

    /// The TTL starts once the lock is held; time spent waiting for it
    /// does not shorten the entry's lifetime.
    async fn set_locked(
        &self,
        lease: &IndexLease<Held>,
        item: CacheItem,
        ttl: Duration,
    ) -> CairnResult<()> {
        self.index.add(&*self.store, lease, &item.key).await?;

        let item = item.with_ttl(Utc::now(), ttl);
        let key = item.key.clone();
        if self.store.save(item, SaveMode::Overwrite).await? {
            Ok(())
        } else {
            Err(StorageError::WriteFailed {
                key,
                reason: "store rejected write".to_string(),
            }
            .into())
        }
    }

    /// Remove `identifier` from `group`. Removing an absent entry succeeds.
    pub async fn delete(&self, identifier: &str, group: Option<&str>) -> CairnResult<()> {
        let key = self.key_for(identifier, group);

        let lease = self.lock.acquire(&*self.store).await?;
        let result = async {
            self.index.remove(&*self.store, &lease, &key).await?;
            self.store.delete_item(&key).await
        }
        .await;
        self.release(lease, result).await?;

        debug!(namespace = %self.namespace, key = %key, "cache delete");
        Ok(())
    }

    /// Delete the indexed keys of `group` ([`CleanMode::Group`]) or every
    /// indexed key outside it ([`CleanMode::NotGroup`]).
    ///
    /// Returns the deleted keys.
    pub async fn clean(&self, group: &str, mode: CleanMode) -> CairnResult<Vec<String>> {
        let prefix = NamespacedKey::group_prefix(&self.namespace, group);

        let lease = self.lock.acquire(&*self.store).await?;
        let result = self
            .index
            .sweep(&*self.store, &lease, |key| {
                mode.selects(key.starts_with(&prefix))
            })
            .await;
        let removed = self.release(lease, result).await?;

        debug!(
            namespace = %self.namespace,
            group,
            mode = %mode,
            removed = removed.len(),
            "cache clean"
        );
        Ok(removed)
    }

    /// Like [`Cache::clean`], but finds keys by enumerating the store instead
    /// of trusting the index.
    ///
    /// Catches data keys the index lost track of. Only this namespace's data
    /// keys are considered. Swept keys are dropped from the index as well.
    pub async fn clean_by_scan(&self, group: &str, mode: CleanMode) -> CairnResult<Vec<String>> {
        let namespace_prefix = NamespacedKey::namespace_prefix(&self.namespace);
        let group_prefix = NamespacedKey::group_prefix(&self.namespace, group);
        let selects = |key: &str| mode.selects(key.starts_with(&group_prefix));

        let lease = self.lock.acquire(&*self.store).await?;
        let result = async {
            let scanned: Vec<String> = self
                .store
                .keys()
                .await?
                .into_iter()
                .filter(|key| key.starts_with(&namespace_prefix) && selects(key.as_str()))
                .collect();
            if !scanned.is_empty() {
                self.store.delete_items(&scanned).await?;
            }

            let indexed = self.index.sweep(&*self.store, &lease, selects).await?;

            let mut removed: KeySet = scanned.into_iter().collect();
            removed.extend(indexed);
            Ok::<_, CairnError>(removed.into_iter().collect::<Vec<_>>())
        }
        .await;
        let removed = self.release(lease, result).await?;

        debug!(
            namespace = %self.namespace,
            group,
            mode = %mode,
            removed = removed.len(),
            "cache clean by scan"
        );
        Ok(removed)
    }

    /// Remove expired items from the store and drop index entries whose
    /// items are gone. Returns the dropped index entries.
    pub async fn purge_expired(&self) -> CairnResult<Vec<String>> {
        let purged = self.store.purge_expired().await?;

        let lease = self.lock.acquire(&*self.store).await?;
        let result = self.index.retain_live(&*self.store, &lease).await;
        let dropped = self.release(lease, result).await?;

        debug!(namespace = %self.namespace, purged, dropped = dropped.len(), "purged expired entries");
        Ok(dropped)
    }

    /// Rebuild the index from the store's keys. Returns the number of keys indexed.
    pub async fn rebuild_index(&self) -> CairnResult<usize> {
        let lease = self.lock.acquire(&*self.store).await?;
        let result = self.index.rebuild(&*self.store, &lease).await;
        let keys = self.release(lease, result).await?;
        warn!(namespace = %self.namespace, keys = keys.len(), "rebuilt invalidation index");
        Ok(keys.len())
    }

    /// Read the index under the lock.
    pub async fn index_snapshot(&self) -> CairnResult<KeySet> {
        let lease = self.lock.acquire(&*self.store).await?;
        let result = self.index.load(&*self.store, &lease).await;
        self.release(lease, result).await
    }

    /// Backend statistics.
    pub async fn stats(&self) -> CairnResult<CacheStats> {
        self.store.stats().await
    }

    /// Release the lock and hand back the critical section's result.
    ///
    /// A failed release is logged, not returned: the sentinel expires on its
    /// own and the critical section's outcome is what the caller needs.
    async fn release<T>(&self, lease: IndexLease<Held>, result: CairnResult<T>) -> CairnResult<T> {
        if let Err(e) = self.lock.release(&*self.store, lease).await {
            warn!(namespace = %self.namespace, error = %e, "failed to release index lock");
        }
        if let Err(e) = &result {
            warn!(namespace = %self.namespace, error = %e, "index critical section failed");
        }
        result
    }
}
