//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "__default";

/// Group used when a call does not name one.
pub const DEFAULT_GROUP: &str = "default";

/// Lifetime of entries written without an explicit TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(900);

// ============================================================================
// BACKEND KIND
// ============================================================================

/// Item store backend selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// In-process map, shared by every facade built on the same store
    Memory,
    /// LMDB environment on disk, shared across processes
    File,
    /// Networked Redis server
    Redis,
    /// Stores nothing; every read misses
    None,
}

impl BackendKind {
    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Redis => "redis",
            BackendKind::None => "none",
        }
    }

    /// Resolve an adapter name (case-insensitive).
    ///
    /// `runtime` and `lmdb` are accepted as aliases. Unknown names are a
    /// configuration error rather than a silent fallback.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "memory" | "runtime" => Ok(BackendKind::Memory),
            "file" | "lmdb" => Ok(BackendKind::File),
            "redis" => Ok(BackendKind::Redis),
            "none" => Ok(BackendKind::None),
            _ => Err(ConfigError::ProviderNotSupported {
                provider: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

// ============================================================================
// LOCK CONFIG
// ============================================================================

/// Tuning for the per-namespace index lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lifetime of the lock sentinel. A crashed holder's lock disappears after this.
    pub ttl: Duration,
    /// Sleep between acquisition attempts.
    pub retry_interval: Duration,
    /// Maximum number of acquisition attempts.
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_interval: Duration::from_micros(100),
            max_attempts: 300,
        }
    }
}

impl LockConfig {
    /// Upper bound on time spent waiting for the lock.
    pub fn max_wait(&self) -> Duration {
        self.retry_interval.saturating_mul(self.max_attempts)
    }

    /// Set the sentinel TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

// ============================================================================
// CACHE CONFIG
// ============================================================================

/// Master configuration for a cache facade and its backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: BackendKind,
    /// Namespace (context) isolating this application's keys
    pub namespace: String,
    pub default_group: String,
    /// TTL for entries written without one. Zero means no expiry.
    pub default_ttl: Duration,
    pub lock: LockConfig,

    // Backend-specific options
    /// LMDB directory (file backend)
    pub path: Option<PathBuf>,
    /// LMDB map size in megabytes (file backend)
    pub map_size_mb: usize,
    /// Connection URL (redis backend)
    pub url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_group: DEFAULT_GROUP.to_string(),
            default_ttl: DEFAULT_TTL,
            lock: LockConfig::default(),
            path: None,
            map_size_mb: 64,
            url: None,
        }
    }
}

impl CacheConfig {
    /// Create a config for the given backend with default values.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default group.
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = group.into();
        self
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the lock tuning.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Set the LMDB directory.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the redis URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Build a config from an already-resolved flat option mapping.
    ///
    /// Recognized options:
    /// - `adapter` (required): `memory`, `file`, `redis` or `none`
    /// - `namespace` or `context`, `default_group`, `ttl` (seconds)
    /// - `path`, `map_size_mb` (file), `url` (redis)
    /// - `lock_ttl_ms`, `lock_retry_interval_us`, `lock_max_attempts`
    ///
    /// Unknown options are ignored. The result is validated.
    pub fn from_options(options: &HashMap<String, String>) -> CairnResult<Self> {
        let adapter = options
            .get("adapter")
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "adapter".to_string(),
            })?;

        let mut config = Self::new(BackendKind::from_name(adapter)?);

        if let Some(namespace) = options.get("namespace").or_else(|| options.get("context")) {
            config.namespace = namespace.clone();
        }
        if let Some(group) = options.get("default_group") {
            config.default_group = group.clone();
        }
        if let Some(ttl) = parse_option::<u64>(options, "ttl")? {
            config.default_ttl = Duration::from_secs(ttl);
        }
        if let Some(path) = options.get("path") {
            config.path = Some(PathBuf::from(path));
        }
        if let Some(map_size_mb) = parse_option::<usize>(options, "map_size_mb")? {
            config.map_size_mb = map_size_mb;
        }
        if let Some(url) = options.get("url") {
            config.url = Some(url.clone());
        }
        if let Some(ms) = parse_option::<u64>(options, "lock_ttl_ms")? {
            config.lock.ttl = Duration::from_millis(ms);
        }
        if let Some(us) = parse_option::<u64>(options, "lock_retry_interval_us")? {
            config.lock.retry_interval = Duration::from_micros(us);
        }
        if let Some(attempts) = parse_option::<u32>(options, "lock_max_attempts")? {
            config.lock.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build a config from `CAIRN_CACHE_*` environment variables.
    ///
    /// Each option of [`CacheConfig::from_options`] maps to the upper-cased
    /// variable, e.g. `CAIRN_CACHE_ADAPTER`, `CAIRN_CACHE_LOCK_TTL_MS`.
    pub fn from_env() -> CairnResult<Self> {
        const FIELDS: [&str; 11] = [
            "adapter",
            "namespace",
            "context",
            "default_group",
            "ttl",
            "path",
            "map_size_mb",
            "url",
            "lock_ttl_ms",
            "lock_retry_interval_us",
            "lock_max_attempts",
        ];

        let options = FIELDS
            .iter()
            .filter_map(|field| {
                let var = format!("CAIRN_CACHE_{}", field.to_uppercase());
                std::env::var(var).ok().map(|value| (field.to_string(), value))
            })
            .collect();

        Self::from_options(&options)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(CairnError::Config) if invalid.
    ///
    /// Validates:
    /// - namespace and default_group are non-empty
    /// - lock retry interval is positive and max_attempts >= 1
    /// - lock TTL outlives the maximum retry wait
    /// - backend-specific options are present
    pub fn validate(&self) -> CairnResult<()> {
        if self.namespace.is_empty() {
            return Err(CairnError::Config(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: self.namespace.clone(),
                reason: "namespace must not be empty".to_string(),
            }));
        }

        if self.default_group.is_empty() {
            return Err(CairnError::Config(ConfigError::InvalidValue {
                field: "default_group".to_string(),
                value: self.default_group.clone(),
                reason: "default_group must not be empty".to_string(),
            }));
        }

        if self.lock.retry_interval.is_zero() {
            return Err(CairnError::Config(ConfigError::InvalidValue {
                field: "lock.retry_interval".to_string(),
                value: format!("{:?}", self.lock.retry_interval),
                reason: "retry_interval must be positive".to_string(),
            }));
        }

        if self.lock.max_attempts == 0 {
            return Err(CairnError::Config(ConfigError::InvalidValue {
                field: "lock.max_attempts".to_string(),
                value: self.lock.max_attempts.to_string(),
                reason: "max_attempts must be at least 1".to_string(),
            }));
        }

        // Otherwise a waiter could see an expired sentinel while the holder is still working.
        if self.lock.ttl <= self.lock.max_wait() {
            return Err(CairnError::Config(ConfigError::InvalidValue {
                field: "lock.ttl".to_string(),
                value: format!("{:?}", self.lock.ttl),
                reason: format!(
                    "lock ttl must exceed the maximum retry wait of {:?}",
                    self.lock.max_wait()
                ),
            }));
        }

        match self.backend {
            BackendKind::File if self.path.is_none() => {
                Err(CairnError::Config(ConfigError::MissingRequired {
                    field: "path".to_string(),
                }))
            }
            BackendKind::File if self.map_size_mb == 0 => {
                Err(CairnError::Config(ConfigError::InvalidValue {
                    field: "map_size_mb".to_string(),
                    value: self.map_size_mb.to_string(),
                    reason: "map_size_mb must be greater than 0".to_string(),
                }))
            }
            BackendKind::Redis if self.url.is_none() => {
                Err(CairnError::Config(ConfigError::MissingRequired {
                    field: "url".to_string(),
                }))
            }
            _ => Ok(()),
        }
    }
}

/// Parse an optional numeric option.
fn parse_option<T: FromStr>(
    options: &HashMap<String, String>,
    field: &str,
) -> Result<Option<T>, ConfigError> {
    match options.get(field) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            }),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.namespace, "__default");
        assert_eq!(config.default_group, "default");
        assert_eq!(config.default_ttl, Duration::from_secs(900));
        assert_eq!(config.lock.max_wait(), Duration::from_millis(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_kind_names() {
        for kind in [
            BackendKind::Memory,
            BackendKind::File,
            BackendKind::Redis,
            BackendKind::None,
        ] {
            assert_eq!(BackendKind::from_name(kind.as_str()).unwrap(), kind);
        }
        assert_eq!("Runtime".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("LMDB".parse::<BackendKind>().unwrap(), BackendKind::File);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = BackendKind::from_name("wincache").unwrap_err();
        assert!(matches!(err, ConfigError::ProviderNotSupported { .. }));
    }

    #[test]
    fn test_from_options_full() {
        let config = CacheConfig::from_options(&options(&[
            ("adapter", "file"),
            ("context", "shop"),
            ("default_group", "pages"),
            ("ttl", "60"),
            ("path", "/tmp/cairn"),
            ("map_size_mb", "16"),
            ("lock_ttl_ms", "5000"),
            ("lock_retry_interval_us", "200"),
            ("lock_max_attempts", "50"),
        ]))
        .unwrap();

        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.namespace, "shop");
        assert_eq!(config.default_group, "pages");
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.path, Some(PathBuf::from("/tmp/cairn")));
        assert_eq!(config.map_size_mb, 16);
        assert_eq!(config.lock.ttl, Duration::from_millis(5000));
        assert_eq!(config.lock.retry_interval, Duration::from_micros(200));
        assert_eq!(config.lock.max_attempts, 50);
    }

    #[test]
    fn test_from_options_requires_adapter() {
        let err = CacheConfig::from_options(&options(&[("ttl", "60")])).unwrap_err();
        assert!(matches!(
            err,
            CairnError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_from_options_rejects_bad_number() {
        let err =
            CacheConfig::from_options(&options(&[("adapter", "memory"), ("ttl", "soon")]))
                .unwrap_err();
        assert!(matches!(err, CairnError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_file_backend_requires_path() {
        let err = CacheConfig::from_options(&options(&[("adapter", "file")])).unwrap_err();
        assert!(matches!(
            err,
            CairnError::Config(ConfigError::MissingRequired { ref field }) if field == "path"
        ));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        assert!(CacheConfig::new(BackendKind::Redis).validate().is_err());
        assert!(CacheConfig::new(BackendKind::Redis)
            .with_url("redis://127.0.0.1/")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_lock_ttl_must_outlive_retry_budget() {
        let config = CacheConfig::default().with_lock(
            LockConfig::default()
                .with_ttl(Duration::from_millis(10))
                .with_retry_interval(Duration::from_millis(1))
                .with_max_attempts(10),
        );
        assert!(config.validate().is_err());

        let config = config.with_lock(
            LockConfig::default()
                .with_ttl(Duration::from_millis(11))
                .with_retry_interval(Duration::from_millis(1))
                .with_max_attempts(10),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config =
            CacheConfig::default().with_lock(LockConfig::default().with_max_attempts(0));
        assert!(config.validate().is_err());
    }
}
