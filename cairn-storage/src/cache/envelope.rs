//! Byte layout for items in backends without a native item structure.
//!
//! Format: `[expires_at: 8 bytes, i64 LE unix millis, 0 = never][value]`

use cairn_core::{CacheItem, StorageError, Timestamp};
use chrono::DateTime;

const HEADER_LEN: usize = 8;

/// Encode an item's expiry and value.
pub fn encode(item: &CacheItem) -> Vec<u8> {
    let expires_millis = item.expires_at.map(|at| at.timestamp_millis()).unwrap_or(0);

    let mut bytes = Vec::with_capacity(HEADER_LEN + item.value.len());
    bytes.extend_from_slice(&expires_millis.to_le_bytes());
    bytes.extend_from_slice(&item.value);
    bytes
}

/// Decode bytes written by [`encode`] back into an item stored under `key`.
pub fn decode(key: &str, bytes: &[u8]) -> Result<CacheItem, StorageError> {
    let expires_at = expires_at(key, bytes)?;
    Ok(CacheItem::new(key, bytes[HEADER_LEN..].to_vec()).with_expires_at(expires_at))
}

/// Read only the expiry header.
pub fn expires_at(key: &str, bytes: &[u8]) -> Result<Option<Timestamp>, StorageError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| StorageError::Serialization {
            key: key.to_string(),
            reason: format!("envelope shorter than {} bytes", HEADER_LEN),
        })?;

    match i64::from_le_bytes(header) {
        0 => Ok(None),
        millis => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| StorageError::Serialization {
                key: key.to_string(),
                reason: format!("expiry {} out of range", millis),
            }),
    }
}

/// Whether the encoded item is expired at `now`.
pub fn is_expired(key: &str, bytes: &[u8], now: Timestamp) -> Result<bool, StorageError> {
    Ok(expires_at(key, bytes)?.is_some_and(|at| now >= at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_item_without_expiry() {
        let item = CacheItem::new("k", b"[1,2]".to_vec());
        let bytes = encode(&item);
        assert_eq!(&bytes[..8], &[0u8; 8]);
        assert_eq!(decode("k", &bytes).unwrap(), item);
    }

    #[test]
    fn test_expiry_keeps_millisecond_precision() {
        let now = Utc::now();
        let item = CacheItem::new("k", b"\"v\"".to_vec()).with_ttl(now, Duration::from_secs(60));
        let decoded = decode("k", &encode(&item)).unwrap();

        let expected = item.expires_at.unwrap().timestamp_millis();
        assert_eq!(decoded.expires_at.unwrap().timestamp_millis(), expected);
        assert!(!is_expired("k", &encode(&item), now).unwrap());
        assert!(is_expired("k", &encode(&item), now + chrono::Duration::seconds(61)).unwrap());
    }

    #[test]
    fn test_short_envelope_is_rejected() {
        let err = decode("k", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[test]
    fn test_empty_value() {
        let item = CacheItem::new("k", Vec::new());
        assert_eq!(decode("k", &encode(&item)).unwrap().value, Vec::<u8>::new());
    }
}
