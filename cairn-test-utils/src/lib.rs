//! CAIRN Test Utilities
//!
//! Shared test infrastructure for the CAIRN workspace:
//! - Proptest generators for key components, values and operation sequences
//! - A failure-injecting item store wrapper
//! - Test fixtures for caches over each local backend
//! - Custom assertions for index/store consistency

pub use cairn_core::{
    BackendKind, CacheConfig, CacheItem, CairnError, CairnResult, ConfigError, IndexError,
    LockConfig, NamespacedKey, SaveMode, StorageError,
};
pub use cairn_storage::{
    Cache, CacheStats, CleanMode, ItemStore, LmdbItemStore, MemoryItemStore, NullItemStore,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

// ============================================================================
// FAILURE INJECTION
// ============================================================================

/// Where [`FailingStore`] injects an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Reads of any key
    Read,
    /// Saves of facade data keys
    DataSave,
    /// Saves of the invalidation index
    IndexSave,
    /// Deletes of facade data keys
    DataDelete,
    /// Deletes of the lock sentinel
    LockRelease,
}

/// What a raw store key is, from the facade's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Data,
    Index,
    Lock,
}

fn classify(key: &str) -> KeyKind {
    if NamespacedKey::decode(key).is_some() {
        KeyKind::Data
    } else if key.ends_with("-index_lock") {
        KeyKind::Lock
    } else {
        KeyKind::Index
    }
}

/// Wraps a store and fails selected operations on demand.
pub struct FailingStore<S: ItemStore + ?Sized = MemoryItemStore> {
    inner: Arc<S>,
    armed: Mutex<HashSet<FailPoint>>,
}

impl<S: ItemStore + ?Sized> FailingStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Start failing at `point`.
    pub fn arm(&self, point: FailPoint) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.insert(point);
        }
    }

    /// Stop failing at `point`.
    pub fn disarm(&self, point: FailPoint) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.remove(&point);
        }
    }

    fn check(&self, point: FailPoint) -> CairnResult<()> {
        let armed = self.armed.lock().map(|a| a.contains(&point)).unwrap_or(false);
        if armed {
            Err(StorageError::Backend {
                backend: "failing".to_string(),
                reason: format!("injected failure at {:?}", point),
            }
            .into())
        } else {
            Ok(())
        }
    }

    fn check_delete(&self, key: &str) -> CairnResult<()> {
        match classify(key) {
            KeyKind::Data => self.check(FailPoint::DataDelete),
            KeyKind::Lock => self.check(FailPoint::LockRelease),
            KeyKind::Index => Ok(()),
        }
    }
}

#[async_trait]
impl<S: ItemStore + ?Sized> ItemStore for FailingStore<S> {
    fn backend_name(&self) -> &'static str {
        "failing"
    }

    async fn get_item(&self, key: &str) -> CairnResult<Option<CacheItem>> {
        self.check(FailPoint::Read)?;
        self.inner.get_item(key).await
    }

    async fn save(&self, item: CacheItem, mode: SaveMode) -> CairnResult<bool> {
        match classify(&item.key) {
            KeyKind::Data => self.check(FailPoint::DataSave)?,
            KeyKind::Index => self.check(FailPoint::IndexSave)?,
            KeyKind::Lock => {}
        }
        self.inner.save(item, mode).await
    }

    async fn delete_item(&self, key: &str) -> CairnResult<()> {
        self.check_delete(key)?;
        self.inner.delete_item(key).await
    }

    async fn delete_items(&self, keys: &[String]) -> CairnResult<()> {
        for key in keys {
            self.check_delete(key)?;
        }
        self.inner.delete_items(keys).await
    }

    async fn keys(&self) -> CairnResult<Vec<String>> {
        self.check(FailPoint::Read)?;
        self.inner.keys().await
    }

    async fn purge_expired(&self) -> CairnResult<u64> {
        self.inner.purge_expired().await
    }

    async fn stats(&self) -> CairnResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;

    /// A namespace. Includes the key delimiter and the escape character.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z0-9_%-]{1,6}"
    }

    /// A group name drawn from a small pool so groups collide often.
    pub fn arb_group() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["g1", "g2", "g-1", "g", "g1-x", "%2D", "default"])
            .prop_map(str::to_string)
    }

    /// An identifier, possibly empty, possibly containing delimiters.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_%-]{0,6}"
    }

    /// A JSON value of modest shape.
    pub fn arb_json_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[ -~]{0,16}".prop_map(serde_json::Value::from),
            prop::collection::vec(any::<i32>(), 0..4).prop_map(serde_json::Value::from),
        ]
    }

    /// A clean mode name, including strings that are neither mode.
    pub fn arb_clean_mode_name() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["group", "notgroup", "Group", "", "groups", "everything"])
            .prop_map(str::to_string)
    }

    /// One mutating facade call.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        Set {
            group: String,
            identifier: String,
            value: serde_json::Value,
        },
        Delete {
            group: String,
            identifier: String,
        },
        Clean {
            group: String,
            mode: CleanMode,
        },
    }

    /// Generate a single operation.
    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        // Short identifiers from a small pool make deletes actually hit.
        let identifier = prop::sample::select(vec!["a", "b", "c", "a-b"]).prop_map(str::to_string);
        prop_oneof![
            4 => (arb_group(), identifier.clone(), arb_json_value()).prop_map(
                |(group, identifier, value)| CacheOp::Set { group, identifier, value }
            ),
            2 => (arb_group(), identifier).prop_map(|(group, identifier)| CacheOp::Delete {
                group,
                identifier
            }),
            1 => (arb_group(), any::<bool>()).prop_map(|(group, by_group)| CacheOp::Clean {
                group,
                mode: if by_group { CleanMode::Group } else { CleanMode::NotGroup },
            }),
        ]
    }

    /// Generate a sequence of operations.
    pub fn arb_cache_ops(max_len: usize) -> impl Strategy<Value = Vec<CacheOp>> {
        prop::collection::vec(arb_cache_op(), 0..max_len)
    }

    /// Apply one operation through the facade.
    pub async fn apply_op<S: ItemStore + ?Sized>(cache: &Cache<S>, op: &CacheOp) -> CairnResult<()> {
        match op {
            CacheOp::Set {
                group,
                identifier,
                value,
            } => cache.set(value, identifier, Some(group.as_str()), None).await,
            CacheOp::Delete { group, identifier } => {
                cache.delete(identifier, Some(group.as_str())).await
            }
            CacheOp::Clean { group, mode } => cache.clean(group, *mode).await.map(|_| ()),
        }
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches for common testing scenarios.

    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Lock tuning that tolerates heavy contention from many tasks.
    pub fn patient_lock() -> LockConfig {
        LockConfig::default()
            .with_ttl(Duration::from_secs(30))
            .with_retry_interval(Duration::from_micros(200))
            .with_max_attempts(25_000)
    }

    /// Memory config for `namespace` with a patient lock.
    pub fn test_config(namespace: &str) -> CacheConfig {
        CacheConfig::new(BackendKind::Memory)
            .with_namespace(namespace)
            .with_lock(patient_lock())
    }

    /// Cache over a fresh in-memory store.
    pub fn memory_cache(namespace: &str) -> Cache<MemoryItemStore> {
        Cache::new(Arc::new(MemoryItemStore::new()), &test_config(namespace))
            .expect("test config must be valid")
    }

    /// Cache over a fresh LMDB store in a temporary directory.
    ///
    /// Keep the `TempDir` alive for as long as the cache is used.
    pub fn lmdb_cache(namespace: &str) -> (Cache<LmdbItemStore>, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbItemStore::new(temp_dir.path(), 16).expect("store creation should succeed");
        let config = test_config(namespace);
        let cache = Cache::new(Arc::new(store), &config).expect("test config must be valid");
        (cache, temp_dir)
    }

    /// Cache over a failure-injecting wrapper of a fresh in-memory store.
    pub fn failing_cache(namespace: &str) -> (Cache<FailingStore>, Arc<FailingStore>) {
        let store = Arc::new(FailingStore::new(Arc::new(MemoryItemStore::new())));
        let config = test_config(namespace).with_lock(
            LockConfig::default()
                .with_retry_interval(Duration::from_micros(100))
                .with_max_attempts(10),
        );
        let cache = Cache::new(Arc::clone(&store), &config).expect("test config must be valid");
        (cache, store)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for CAIRN-specific invariants.

    use super::*;
    use std::collections::BTreeSet;

    /// Assert that a CairnResult failed on index lock contention.
    #[track_caller]
    pub fn assert_lock_contention<T: std::fmt::Debug>(result: &CairnResult<T>) {
        match result {
            Err(e) if e.is_lock_contention() => {}
            other => panic!("Expected lock contention, got: {:?}", other),
        }
    }

    /// Assert that a CairnResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &CairnResult<T>) {
        match result {
            Err(CairnError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that the namespace's index lists exactly the namespace's data
    /// keys present in the store.
    pub async fn assert_index_matches_store<S: ItemStore + ?Sized>(cache: &Cache<S>) {
        let index = cache
            .index_snapshot()
            .await
            .expect("index snapshot should succeed");

        let prefix = NamespacedKey::namespace_prefix(cache.namespace());
        let stored: BTreeSet<String> = cache
            .store()
            .keys()
            .await
            .expect("key enumeration should succeed")
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();

        assert_eq!(
            index,
            stored,
            "index of namespace {:?} drifted from the store",
            cache.namespace()
        );
    }

    /// Assert that the lock sentinel of the cache's namespace is not held.
    pub async fn assert_unlocked<S: ItemStore + ?Sized>(cache: &Cache<S>) {
        let sentinel = cache
            .store()
            .get_item(&NamespacedKey::lock_key(cache.namespace()))
            .await
            .expect("sentinel read should succeed");
        assert!(sentinel.is_none(), "index lock of {:?} still held", cache.namespace());
    }
}
