//! Per-namespace index of every data key the facade has written.
//!
//! The index is an ordinary item under the reserved key
//! [`NamespacedKey::index_key`], holding a JSON array of keys with no expiry.
//! It is what lets a group be cleaned on backends that cannot delete by
//! prefix.
//!
//! Every operation is a read-modify-write on that one item, so each takes an
//! `&IndexLease<Held>` as proof that the namespace's index lock is held.
//!
//! # Consistency
//!
//! A failed persist surfaces as an error, but store deletions performed
//! before it are not rolled back. The index may then still list keys that
//! are already gone; [`InvalidationIndex::retain_live`] repairs that.

use std::collections::BTreeSet;

use cairn_core::{
    CacheItem, CairnResult, Held, IndexError, IndexLease, NamespacedKey, SaveMode, StorageError,
};
use tracing::debug;

use super::traits::ItemStore;

/// Key set as persisted.
pub type KeySet = BTreeSet<String>;

#[derive(Debug, Clone)]
pub struct InvalidationIndex {
    namespace: String,
    index_key: String,
}

impl InvalidationIndex {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            index_key: NamespacedKey::index_key(&namespace),
            namespace,
        }
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// Read the index, creating an empty one on first use.
    pub async fn load<S>(&self, store: &S, lease: &IndexLease<Held>) -> CairnResult<KeySet>
    where
        S: ItemStore + ?Sized,
    {
        self.check_lease(lease);

        match store.get_item(&self.index_key).await? {
            Some(item) => serde_json::from_slice(&item.value).map_err(|e| {
                IndexError::Corrupt {
                    namespace: self.namespace.clone(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => {
                let empty = KeySet::new();
                self.persist(store, &empty).await?;
                debug!(namespace = %self.namespace, "initialized invalidation index");
                Ok(empty)
            }
        }
    }

    /// Insert `key`. Persists only when the set changed.
    ///
    /// Returns whether the key was newly added.
    pub async fn add<S>(&self, store: &S, lease: &IndexLease<Held>, key: &str) -> CairnResult<bool>
    where
        S: ItemStore + ?Sized,
    {
        let mut keys = self.load(store, lease).await?;
        if !keys.insert(key.to_string()) {
            return Ok(false);
        }
        self.persist(store, &keys).await?;
        Ok(true)
    }

    /// Remove `key`. Always persists.
    ///
    /// Returns whether the key was present.
    pub async fn remove<S>(
        &self,
        store: &S,
        lease: &IndexLease<Held>,
        key: &str,
    ) -> CairnResult<bool>
    where
        S: ItemStore + ?Sized,
    {
        let mut keys = self.load(store, lease).await?;
        let removed = keys.remove(key);
        self.persist(store, &keys).await?;
        Ok(removed)
    }

    /// Delete every indexed key matching `predicate` from the store and drop
    /// it from the index. Returns the removed keys in index order.
    pub async fn sweep<S, F>(
        &self,
        store: &S,
        lease: &IndexLease<Held>,
        predicate: F,
    ) -> CairnResult<Vec<String>>
    where
        S: ItemStore + ?Sized,
        F: Fn(&str) -> bool + Send,
    {
        let keys = self.load(store, lease).await?;
        let (removed, retained): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|key| predicate(key));

        if !removed.is_empty() {
            store.delete_items(&removed).await?;
        }
        self.persist(store, &retained.into_iter().collect()).await?;

        debug!(namespace = %self.namespace, removed = removed.len(), "swept invalidation index");
        Ok(removed)
    }

    /// Drop index entries whose item is no longer in the store.
    ///
    /// Expiry and eviction remove items without telling the index; this
    /// restores the index to the set of live keys. Returns the dropped keys.
    pub async fn retain_live<S>(
        &self,
        store: &S,
        lease: &IndexLease<Held>,
    ) -> CairnResult<Vec<String>>
    where
        S: ItemStore + ?Sized,
    {
        let keys = self.load(store, lease).await?;
        let wanted: Vec<String> = keys.iter().cloned().collect();
        let live: KeySet = store
            .get_items(&wanted)
            .await?
            .into_iter()
            .map(|item| item.key)
            .collect();

        let dropped: Vec<String> = keys.difference(&live).cloned().collect();
        if !dropped.is_empty() {
            self.persist(store, &live).await?;
            debug!(namespace = %self.namespace, dropped = dropped.len(), "dropped dead index entries");
        }
        Ok(dropped)
    }

    /// Replace the index with the namespace's data keys found by scanning
    /// the store. Used to recover a corrupt or lost index.
    pub async fn rebuild<S>(&self, store: &S, lease: &IndexLease<Held>) -> CairnResult<KeySet>
    where
        S: ItemStore + ?Sized,
    {
        self.check_lease(lease);

        let prefix = NamespacedKey::namespace_prefix(&self.namespace);
        let keys: KeySet = store
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();

        self.persist(store, &keys).await?;
        debug!(namespace = %self.namespace, keys = keys.len(), "rebuilt invalidation index");
        Ok(keys)
    }

    async fn persist<S>(&self, store: &S, keys: &KeySet) -> CairnResult<()>
    where
        S: ItemStore + ?Sized,
    {
        let item = CacheItem::from_json(self.index_key.as_str(), keys)?;
        if store.save(item, SaveMode::Overwrite).await? {
            Ok(())
        } else {
            Err(StorageError::WriteFailed {
                key: self.index_key.clone(),
                reason: "store rejected index write".to_string(),
            }
            .into())
        }
    }

    fn check_lease(&self, lease: &IndexLease<Held>) {
        debug_assert_eq!(
            lease.namespace(),
            self.namespace,
            "index lease belongs to another namespace"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::index_lock::IndexLock;
    use crate::cache::memory_backend::MemoryItemStore;
    use cairn_core::LockConfig;

    async fn setup() -> (MemoryItemStore, InvalidationIndex, IndexLease<Held>) {
        let store = MemoryItemStore::new();
        let lease = IndexLock::new("ns", LockConfig::default())
            .acquire(&store)
            .await
            .unwrap();
        (store, InvalidationIndex::new("ns"), lease)
    }

    async fn put(store: &MemoryItemStore, key: &str) {
        store
            .save(CacheItem::new(key, b"1".to_vec()), SaveMode::Overwrite)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_initializes_empty_index_without_expiry() {
        let (store, index, lease) = setup().await;

        assert!(index.load(&store, &lease).await.unwrap().is_empty());

        let stored = store.get_item("ns-index").await.unwrap().unwrap();
        assert_eq!(stored.expires_at, None);
        assert_eq!(stored.value, b"[]".to_vec());
    }

    #[tokio::test]
    async fn test_add_has_set_semantics() {
        let (store, index, lease) = setup().await;

        assert!(index.add(&store, &lease, "ns-cache-g-a").await.unwrap());
        assert!(!index.add(&store, &lease, "ns-cache-g-a").await.unwrap());
        assert!(index.add(&store, &lease, "ns-cache-g-b").await.unwrap());

        let keys = index.load(&store, &lease).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_noop() {
        let (store, index, lease) = setup().await;

        index.add(&store, &lease, "ns-cache-g-a").await.unwrap();
        assert!(index.remove(&store, &lease, "ns-cache-g-a").await.unwrap());
        assert!(!index.remove(&store, &lease, "ns-cache-g-a").await.unwrap());
        assert!(index.load(&store, &lease).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_deletes_matching_keys() {
        let (store, index, lease) = setup().await;
        for key in ["ns-cache-g1-a", "ns-cache-g1-b", "ns-cache-g2-c"] {
            put(&store, key).await;
            index.add(&store, &lease, key).await.unwrap();
        }

        let removed = index
            .sweep(&store, &lease, |key| key.starts_with("ns-cache-g1-"))
            .await
            .unwrap();
        assert_eq!(removed, vec!["ns-cache-g1-a", "ns-cache-g1-b"]);

        assert!(store.get_item("ns-cache-g1-a").await.unwrap().is_none());
        assert!(store.get_item("ns-cache-g2-c").await.unwrap().is_some());

        let keys = index.load(&store, &lease).await.unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["ns-cache-g2-c"]);
    }

    #[tokio::test]
    async fn test_retain_live_drops_vanished_keys() {
        let (store, index, lease) = setup().await;
        put(&store, "ns-cache-g-live").await;
        index.add(&store, &lease, "ns-cache-g-live").await.unwrap();
        index.add(&store, &lease, "ns-cache-g-gone").await.unwrap();

        let dropped = index.retain_live(&store, &lease).await.unwrap();
        assert_eq!(dropped, vec!["ns-cache-g-gone"]);
        assert_eq!(index.load(&store, &lease).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_index_is_reported_and_rebuildable() {
        let (store, index, lease) = setup().await;
        put(&store, "ns-cache-g-a").await;
        put(&store, "other-cache-g-a").await;
        store
            .save(CacheItem::new("ns-index", b"{oops".to_vec()), SaveMode::Overwrite)
            .await
            .unwrap();

        let err = index.load(&store, &lease).await.unwrap_err();
        assert!(matches!(
            err,
            cairn_core::CairnError::Index(IndexError::Corrupt { .. })
        ));

        let rebuilt = index.rebuild(&store, &lease).await.unwrap();
        assert_eq!(rebuilt.into_iter().collect::<Vec<_>>(), vec!["ns-cache-g-a"]);
        assert_eq!(index.load(&store, &lease).await.unwrap().len(), 1);
    }
}
