//! Advisory per-namespace lock over the invalidation index.
//!
//! The lock is a sentinel item written with [`SaveMode::IfAbsent`] and a
//! short TTL. Its presence means "locked". A holder that dies without
//! releasing simply lets the sentinel expire.
//!
//! This is best-effort mutual exclusion. It is only as strong as the store's
//! conditional write, and a holder that outlives the sentinel TTL loses the
//! lock without noticing. [`CacheConfig::validate`](cairn_core::CacheConfig::validate)
//! keeps the TTL above the retry budget to make that unlikely.

use std::time::Instant;

use cairn_core::{
    CacheItem, CairnResult, Held, IndexError, IndexLease, LeaseData, LockConfig, NamespacedKey,
    SaveMode, StorageError,
};
use chrono::Utc;
use tracing::{debug, trace, warn};

use super::traits::ItemStore;

/// Lock handle for one namespace.
#[derive(Debug, Clone)]
pub struct IndexLock {
    namespace: String,
    sentinel_key: String,
    config: LockConfig,
}

impl IndexLock {
    pub fn new(namespace: impl Into<String>, config: LockConfig) -> Self {
        let namespace = namespace.into();
        Self {
            sentinel_key: NamespacedKey::lock_key(&namespace),
            namespace,
            config,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn sentinel_key(&self) -> &str {
        &self.sentinel_key
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Try to take the lock, polling at the configured interval.
    ///
    /// Gives up after `max_attempts` attempts or once the total wait reaches
    /// `max_attempts * retry_interval`, whichever comes first. Sleeps can
    /// overshoot the interval; the wall-clock cap bounds the total wait.
    ///
    /// # Errors
    ///
    /// - [`IndexError::LockUnavailable`] when the budget is exhausted
    /// - any store error from the conditional write
    pub async fn acquire<S>(&self, store: &S) -> CairnResult<IndexLease<Held>>
    where
        S: ItemStore + ?Sized,
    {
        let started = Instant::now();
        let max_wait = self.config.max_wait();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let data = LeaseData::new(self.namespace.as_str(), Utc::now(), self.config.ttl);
            let bytes = data.to_bytes().map_err(|e| StorageError::Serialization {
                key: self.sentinel_key.clone(),
                reason: e.to_string(),
            })?;
            let sentinel = CacheItem::new(self.sentinel_key.as_str(), bytes)
                .with_expires_at(Some(data.expires_at));

            if store.save(sentinel, SaveMode::IfAbsent).await? {
                debug!(
                    namespace = %self.namespace,
                    lease_id = %data.lease_id,
                    attempts,
                    "acquired index lock"
                );
                return Ok(IndexLease::new(data));
            }

            if attempts >= self.config.max_attempts || started.elapsed() >= max_wait {
                warn!(
                    namespace = %self.namespace,
                    attempts,
                    waited_us = started.elapsed().as_micros() as u64,
                    "index lock unavailable"
                );
                return Err(IndexError::LockUnavailable {
                    namespace: self.namespace.clone(),
                    attempts,
                }
                .into());
            }

            trace!(namespace = %self.namespace, attempts, "index lock busy, retrying");
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    /// Release the lock by deleting the sentinel.
    ///
    /// The delete is unconditional. If the lease had already expired and
    /// someone else took the lock since, their sentinel is removed too; the
    /// lease being stale is logged.
    pub async fn release<S>(&self, store: &S, lease: IndexLease<Held>) -> CairnResult<()>
    where
        S: ItemStore + ?Sized,
    {
        let released = lease.release();
        let data = released.data();
        if data.is_expired(Utc::now()) {
            warn!(
                namespace = %self.namespace,
                lease_id = %data.lease_id,
                "released index lock after its sentinel expired"
            );
        }

        store.delete_item(&self.sentinel_key).await?;
        debug!(namespace = %self.namespace, lease_id = %data.lease_id, "released index lock");
        Ok(())
    }
}
