//! Redis-backed item store.
//!
//! Items are written in the [`envelope`](super::envelope) layout so the
//! expiry survives a round trip, and Redis' own `PX` expiry removes them.
//! `IfAbsent` saves use `SET .. NX`, which Redis applies atomically for
//! every client of the server.

use async_trait::async_trait;
use cairn_core::{CacheItem, CairnError, CairnResult, SaveMode, StorageError};
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{debug, info};

use super::envelope;
use super::traits::{CacheStats, ItemStore};

fn backend_error(e: RedisError) -> CairnError {
    CairnError::Storage(StorageError::Backend {
        backend: "redis".to_string(),
        reason: e.to_string(),
    })
}

/// Redis-backed [`ItemStore`] over one multiplexed connection.
#[derive(Clone)]
pub struct RedisItemStore {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisItemStore").finish_non_exhaustive()
    }
}

impl RedisItemStore {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str) -> CairnResult<Self> {
        info!(url = %sanitize_url(url), "connecting redis item store");

        let client = Client::open(url).map_err(backend_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection.clone())
            .await
            .map_err(backend_error)?;

        debug!("redis item store ready");
        Ok(Self { connection })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

/// Hide the password of a redis URL for logging.
pub(crate) fn sanitize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid_url".to_string(),
    }
}

#[async_trait]
impl ItemStore for RedisItemStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get_item(&self, key: &str) -> CairnResult<Option<CacheItem>> {
        let bytes: Option<Vec<u8>> = self.conn().get(key).await.map_err(backend_error)?;
        match bytes {
            Some(bytes) => {
                let item = envelope::decode(key, &bytes)?;
                // Redis expiry is lazy at millisecond granularity; honor ours too.
                Ok((!item.is_expired(Utc::now())).then_some(item))
            }
            None => Ok(None),
        }
    }

    async fn get_items(&self, keys: &[String]) -> CairnResult<Vec<CacheItem>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn())
            .await
            .map_err(backend_error)?;

        let now = Utc::now();
        let mut items = Vec::with_capacity(keys.len());
        for (key, bytes) in keys.iter().zip(values) {
            let Some(bytes) = bytes else {
                continue;
            };
            // Other clients of the same database may store arbitrary values.
            match envelope::decode(key, &bytes) {
                Ok(item) if !item.is_expired(now) => items.push(item),
                Ok(_) => {}
                Err(e) => debug!(key = %key, error = %e, "skipping item without envelope"),
            }
        }
        Ok(items)
    }

    async fn save(&self, item: CacheItem, mode: SaveMode) -> CairnResult<bool> {
        let ttl_ms = match item.expires_at {
            Some(at) => {
                let remaining = (at - Utc::now()).num_milliseconds();
                if remaining <= 0 {
                    // Already expired: equivalent to the key being absent.
                    if mode == SaveMode::Overwrite {
                        self.delete_item(&item.key).await?;
                    }
                    return Ok(true);
                }
                Some(remaining)
            }
            None => None,
        };

        let mut cmd = redis::cmd("SET");
        cmd.arg(&item.key).arg(envelope::encode(&item));
        if mode == SaveMode::IfAbsent {
            cmd.arg("NX");
        }
        if let Some(ms) = ttl_ms {
            cmd.arg("PX").arg(ms);
        }

        // Nil reply means NX found the key taken.
        let reply: Option<String> = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(|e| StorageError::WriteFailed {
                key: item.key.clone(),
                reason: e.to_string(),
            })?;
        Ok(reply.is_some())
    }

    async fn delete_item(&self, key: &str) -> CairnResult<()> {
        let _: () = self.conn().del(key).await.map_err(|e| StorageError::DeleteFailed {
            count: 1,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn delete_items(&self, keys: &[String]) -> CairnResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = self.conn().del(keys).await.map_err(|e| StorageError::DeleteFailed {
            count: keys.len(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn keys(&self) -> CairnResult<Vec<String>> {
        self.conn().keys("*").await.map_err(backend_error)
    }

    async fn stats(&self) -> CairnResult<CacheStats> {
        let entry_count: u64 = redis::cmd("DBSIZE")
            .query_async(&mut self.conn())
            .await
            .map_err(backend_error)?;
        Ok(CacheStats {
            entry_count,
            ..Default::default()
        })
    }
}
