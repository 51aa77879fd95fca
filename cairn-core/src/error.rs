//! Error types for CAIRN operations

use thiserror::Error;

/// Item store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Delete failed for {count} key(s): {reason}")]
    DeleteFailed { count: usize, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Backend {backend} error: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Invalidation index and index lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Index lock for namespace {namespace} unavailable after {attempts} attempts")]
    LockUnavailable { namespace: String, attempts: u32 },

    #[error("Index for namespace {namespace} is corrupt: {reason}")]
    Corrupt { namespace: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Cache adapter not supported: {provider}")]
    ProviderNotSupported { provider: String },

    #[error("Cache adapter {backend} is not available in this build or environment")]
    BackendUnavailable { backend: String },
}

/// Master error type for all CAIRN errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CairnError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CairnError {
    /// True when the operation failed only because the index lock could not
    /// be acquired in time. Nothing was written; retrying is safe.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, CairnError::Index(IndexError::LockUnavailable { .. }))
    }
}

/// Result type alias for CAIRN operations.
pub type CairnResult<T> = Result<T, CairnError>;

// =============================================================================
// TESTS
// =============================================================================
