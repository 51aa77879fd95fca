//! Index lease typestate for compile-time safety of the lock lifecycle.
//!
//! A lease is what a caller holds while it owns a namespace's index lock.
//! Index operations demand `&IndexLease<Held>` as proof, and releasing
//! consumes the lease so it cannot be released twice.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unlocked) ─── acquire() ──→ Held ─── release() ──→ Released (unlocked)
//!                               │
//!                          TTL elapses ──→ sentinel expires (self-healing)
//! ```

use crate::{EntityId, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

// ============================================================================
// LEASE DATA (persisted as the lock sentinel value)
// ============================================================================

/// Data stored in the lock sentinel item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    pub lease_id: EntityId,
    pub namespace: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// Create lease data starting at `now` and lasting `ttl`.
    ///
    /// Expiry saturates at the latest representable timestamp, so an
    /// oversized TTL yields a lease that never expires rather than one
    /// that is already expired.
    pub fn new(namespace: impl Into<String>, now: Timestamp, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            lease_id: crate::new_entity_id(),
            namespace: namespace.into(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Check if the lease has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            let duration = self.expires_at - now;
            duration.to_std().ok()
        }
    }

    /// Serialize for storage in the sentinel item.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from a sentinel item value.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// The index lock is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LeaseState for Held {}

/// The lease has been released. Only its data can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released;
impl LeaseState for Released {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
    impl Sealed for super::Released {}
}

// ============================================================================
// LEASE TYPESTATE WRAPPER
// ============================================================================

/// A lease on a namespace's index lock with compile-time state tracking.
///
/// Deliberately not `Clone`: exactly one value represents the held lock.
#[derive(Debug)]
pub struct IndexLease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> IndexLease<S> {
    /// Access the underlying lease data (read-only).
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    /// Get the namespace this lease guards.
    pub fn namespace(&self) -> &str {
        &self.data.namespace
    }

    /// Get when the lease was acquired.
    pub fn acquired_at(&self) -> Timestamp {
        self.data.acquired_at
    }

    /// Get when the sentinel expires.
    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }

    /// Consume the lease and return the underlying data.
    pub fn into_data(self) -> LeaseData {
        self.data
    }
}

impl IndexLease<Held> {
    /// Create a held lease from data.
    ///
    /// This should only be called once the sentinel has been written.
    pub fn new(data: LeaseData) -> Self {
        IndexLease {
            data,
            _state: PhantomData,
        }
    }

    /// Transition to the released state.
    ///
    /// Consumes the held lease, so index operations can no longer use it.
    pub fn release(self) -> IndexLease<Released> {
        IndexLease {
            data: self.data,
            _state: PhantomData,
        }
    }

    /// Check if the sentinel backing this lease has expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    /// Get remaining duration until the sentinel expires.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        self.data.remaining_duration(now)
    }
}

impl fmt::Display for IndexLease<Held> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease {} on {} until {}",
            self.data.lease_id, self.data.namespace, self.data.expires_at
        )
    }
}
