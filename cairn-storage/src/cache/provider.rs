//! Backend selection.

use std::sync::Arc;

use cairn_core::{BackendKind, CacheConfig, CairnResult, ConfigError};
use tracing::info;

use super::lmdb_backend::LmdbItemStore;
use super::memory_backend::MemoryItemStore;
use super::null_backend::NullItemStore;
use super::traits::ItemStore;

/// Instantiate the item store named by `config.backend`.
///
/// The config is validated first. A backend compiled out of this build
/// (`redis` without the `redis` feature) or reporting itself unsupported
/// yields [`ConfigError::BackendUnavailable`].
pub async fn open_store(config: &CacheConfig) -> CairnResult<Arc<dyn ItemStore>> {
    config.validate()?;

    let store: Arc<dyn ItemStore> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryItemStore::new()),
        BackendKind::File => {
            let path = config.path.as_ref().ok_or_else(|| ConfigError::MissingRequired {
                field: "path".to_string(),
            })?;
            Arc::new(LmdbItemStore::new(path, config.map_size_mb)?)
        }
        BackendKind::Redis => open_redis(config).await?,
        BackendKind::None => Arc::new(NullItemStore),
    };

    if !store.is_supported() {
        return Err(ConfigError::BackendUnavailable {
            backend: config.backend.to_string(),
        }
        .into());
    }

    info!(
        backend = store.backend_name(),
        namespace = %config.namespace,
        "opened item store"
    );
    Ok(store)
}

#[cfg(feature = "redis")]
async fn open_redis(config: &CacheConfig) -> CairnResult<Arc<dyn ItemStore>> {
    let url = config.url.as_deref().ok_or_else(|| ConfigError::MissingRequired {
        field: "url".to_string(),
    })?;
    Ok(Arc::new(super::redis_backend::RedisItemStore::connect(url).await?))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_config: &CacheConfig) -> CairnResult<Arc<dyn ItemStore>> {
    Err(ConfigError::BackendUnavailable {
        backend: BackendKind::Redis.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::CairnError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_memory_and_none() {
        let memory = open_store(&CacheConfig::new(BackendKind::Memory)).await.unwrap();
        assert_eq!(memory.backend_name(), "memory");

        let none = open_store(&CacheConfig::new(BackendKind::None)).await.unwrap();
        assert_eq!(none.backend_name(), "none");
    }

    #[tokio::test]
    async fn test_open_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new(BackendKind::File).with_path(temp_dir.path());
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend_name(), "file");
    }

    #[tokio::test]
    async fn test_file_without_path_is_config_error() {
        let err = open_store(&CacheConfig::new(BackendKind::File)).await.err().unwrap();
        assert!(matches!(err, CairnError::Config(ConfigError::MissingRequired { .. })));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_unavailable_without_feature() {
        let config = CacheConfig::new(BackendKind::Redis).with_url("redis://127.0.0.1/");
        let err = open_store(&config).await.err().unwrap();
        assert!(matches!(err, CairnError::Config(ConfigError::BackendUnavailable { .. })));
    }
}
