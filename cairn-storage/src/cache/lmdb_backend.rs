//! LMDB-backed item store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store on disk. Several processes may open the same directory;
//! LMDB serializes their write transactions, which is what makes
//! [`SaveMode::IfAbsent`] atomic across processes.
//!
//! Values are stored in the [`envelope`](super::envelope) layout since LMDB
//! has no notion of expiry.
//!
//! # Thread Safety
//!
//! - Read transactions for `get_item` and `keys`
//! - One write transaction per `save`, `delete_items` and `purge_expired`
//! - Hit/miss statistics are process-local

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use cairn_core::{CacheItem, CairnError, CairnResult, SaveMode, StorageError};
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::envelope;
use super::traits::{CacheStats, ItemStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to CairnError.
impl From<LmdbStoreError> for CairnError {
    fn from(e: LmdbStoreError) -> Self {
        CairnError::Storage(StorageError::Backend {
            backend: "file".to_string(),
            reason: e.to_string(),
        })
    }
}

fn txn_error(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB-backed [`ItemStore`].
///
/// # Example
///
/// ```ignore
/// use cairn_storage::cache::{LmdbItemStore, ItemStore};
///
/// let store = LmdbItemStore::new("/var/cache/app", 64)?;
/// store.save(CacheItem::new("k", b"1".to_vec()), SaveMode::Overwrite).await?;
/// ```
pub struct LmdbItemStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Process-local read statistics.
    stats: RwLock<CacheStats>,
}

impl LmdbItemStore {
    /// Open (or create) an LMDB item store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the data file is
        // only ever modified through LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_error)?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "opened LMDB item store");

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn record(&self, hit: bool, expired: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
            if expired {
                stats.expirations += 1;
            }
        }
    }

    /// Collect keys whose envelope satisfies `keep`.
    fn collect_keys<F>(&self, mut keep: F) -> CairnResult<Vec<String>>
    where
        F: FnMut(&str, &[u8]) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let iter = self.db.iter(&rtxn).map_err(txn_error)?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, bytes) = result.map_err(txn_error)?;
            // Keys are always written from `&str`; anything else is foreign.
            let Ok(key) = std::str::from_utf8(key) else {
                continue;
            };
            if keep(key, bytes) {
                keys.push(key.to_string());
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl ItemStore for LmdbItemStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn get_item(&self, key: &str) -> CairnResult<Option<CacheItem>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => {
                let item = envelope::decode(key, bytes)?;
                if item.is_expired(Utc::now()) {
                    self.record(false, true);
                    return Ok(None);
                }
                self.record(true, false);
                Ok(Some(item))
            }
            Ok(None) => {
                self.record(false, false);
                Ok(None)
            }
            Err(e) => Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    async fn get_items(&self, keys: &[String]) -> CairnResult<Vec<CacheItem>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let now = Utc::now();

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let found = self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| StorageError::ReadFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            match found {
                Some(bytes) => {
                    let item = match envelope::decode(key, bytes) {
                        Ok(item) => item,
                        Err(e) => {
                            tracing::debug!(key = %key, error = %e, "skipping item without envelope");
                            continue;
                        }
                    };
                    if item.is_expired(now) {
                        self.record(false, true);
                    } else {
                        self.record(true, false);
                        items.push(item);
                    }
                }
                None => self.record(false, false),
            }
        }

        Ok(items)
    }

    async fn save(&self, item: CacheItem, mode: SaveMode) -> CairnResult<bool> {
        let write_failed = |e: heed::Error| StorageError::WriteFailed {
            key: item.key.clone(),
            reason: e.to_string(),
        };

        let mut wtxn = self.env.write_txn().map_err(write_failed)?;

        if mode == SaveMode::IfAbsent {
            let existing = self.db.get(&wtxn, item.key.as_bytes()).map_err(write_failed)?;
            if let Some(bytes) = existing {
                // An unreadable envelope counts as live so it is never silently stolen.
                let expired = envelope::is_expired(&item.key, bytes, Utc::now()).unwrap_or(false);
                if !expired {
                    return Ok(false);
                }
            }
        }

        self.db
            .put(&mut wtxn, item.key.as_bytes(), &envelope::encode(&item))
            .map_err(write_failed)?;
        wtxn.commit().map_err(write_failed)?;

        Ok(true)
    }

    async fn delete_item(&self, key: &str) -> CairnResult<()> {
        self.delete_items(&[key.to_string()]).await
    }

    async fn delete_items(&self, keys: &[String]) -> CairnResult<()> {
        let delete_failed = |e: heed::Error| StorageError::DeleteFailed {
            count: keys.len(),
            reason: e.to_string(),
        };

        let mut wtxn = self.env.write_txn().map_err(delete_failed)?;
        for key in keys {
            self.db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(delete_failed)?;
        }
        wtxn.commit().map_err(delete_failed)?;

        Ok(())
    }

    async fn keys(&self) -> CairnResult<Vec<String>> {
        let now = Utc::now();
        self.collect_keys(|key, bytes| match envelope::is_expired(key, bytes, now) {
            Ok(expired) => !expired,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "skipping item without envelope");
                false
            }
        })
    }

    async fn purge_expired(&self) -> CairnResult<u64> {
        let now = Utc::now();
        let expired = self.collect_keys(|key, bytes| {
            envelope::is_expired(key, bytes, now).unwrap_or(false)
        })?;
        if expired.is_empty() {
            return Ok(0);
        }

        // Re-check inside the write transaction; a writer may have refreshed the key.
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut removed = 0u64;
        for key in &expired {
            let still_expired = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_error)? {
                Some(bytes) => envelope::is_expired(key, bytes, now).unwrap_or(false),
                None => false,
            };
            if still_expired && self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        tracing::debug!(removed, "purged expired LMDB items");
        Ok(removed)
    }

    async fn stats(&self) -> CairnResult<CacheStats> {
        let (entry_count, memory_bytes) = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let mut count = 0u64;
            let mut bytes = 0u64;
            for result in self.db.iter(&rtxn).map_err(txn_error)? {
                let (key, value) = result.map_err(txn_error)?;
                count += 1;
                bytes += (key.len() + value.len()) as u64;
            }
            (count, bytes)
        };

        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}
