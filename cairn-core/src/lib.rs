//! CAIRN Core - Cache Entity Types
//!
//! Pure data structures shared by every CAIRN crate: key naming, stored
//! items, lock leases, configuration and errors. No I/O happens here.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod key;
pub mod lock;

pub use config::{BackendKind, CacheConfig, LockConfig, DEFAULT_GROUP, DEFAULT_NAMESPACE, DEFAULT_TTL};
pub use error::{CairnError, CairnResult, ConfigError, IndexError, StorageError};
pub use key::NamespacedKey;
pub use lock::{Held, IndexLease, LeaseData, LeaseState, Released};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

// ============================================================================
// STORED ITEMS
// ============================================================================

/// A raw entry as held by an item store.
///
/// `value` is opaque to the store. The facade writes JSON; the index and the
/// lock sentinel write their own payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItem {
    pub key: String,
    pub value: Vec<u8>,
    /// `None` means the item never expires.
    pub expires_at: Option<Timestamp>,
}

impl CacheItem {
    /// Create an item without expiry.
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at: None,
        }
    }

    /// Set expiry to `now + ttl`. A zero TTL leaves the item without expiry.
    pub fn with_ttl(mut self, now: Timestamp, ttl: Duration) -> Self {
        self.expires_at = expiry_after(now, ttl);
        self
    }

    /// Set an absolute expiry.
    pub fn with_expires_at(mut self, expires_at: Option<Timestamp>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Whether the item is expired at `now`. Expiry is inclusive.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Build an item whose value is the JSON encoding of `value`.
    pub fn from_json<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
    ) -> CairnResult<Self> {
        let key = key.into();
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(key, bytes))
    }

    /// Decode the value as JSON.
    pub fn decode_value<T: DeserializeOwned>(&self) -> CairnResult<T> {
        serde_json::from_slice(&self.value).map_err(|e| {
            CairnError::Storage(StorageError::Serialization {
                key: self.key.clone(),
                reason: e.to_string(),
            })
        })
    }
}

/// Absolute expiry for a TTL starting at `now`. Zero means no expiry.
pub fn expiry_after(now: Timestamp, ttl: Duration) -> Option<Timestamp> {
    if ttl.is_zero() {
        return None;
    }
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Some(now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
}

/// Write behavior for [`CacheItem`] saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaveMode {
    /// Replace any existing item.
    Overwrite,
    /// Write only if no live item exists under the key. Atomic per backend.
    IfAbsent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_without_ttl_never_expires() {
        let item = CacheItem::new("k", b"1".to_vec());
        assert!(!item.is_expired(DateTime::<Utc>::MAX_UTC));

        let zero = CacheItem::new("k", b"1".to_vec()).with_ttl(Utc::now(), Duration::ZERO);
        assert_eq!(zero.expires_at, None);
    }

    #[test]
    fn test_item_expiry_is_inclusive() {
        let now = Utc::now();
        let item = CacheItem::new("k", b"1".to_vec()).with_ttl(now, Duration::from_secs(5));
        assert!(!item.is_expired(now));
        assert!(item.is_expired(now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let item = CacheItem::new("k", vec![]).with_ttl(Utc::now(), Duration::MAX);
        assert!(item.expires_at.is_some());
    }

    #[test]
    fn test_json_value_roundtrip() {
        let item = CacheItem::from_json("k", &serde_json::json!({"a": [1, 2]})).unwrap();
        let value: serde_json::Value = item.decode_value().unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let item = CacheItem::new("k", b"{not json".to_vec());
        let err = item.decode_value::<serde_json::Value>().unwrap_err();
        assert!(matches!(
            err,
            CairnError::Storage(StorageError::Serialization { .. })
        ));
    }
}
