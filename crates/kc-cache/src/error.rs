//! Cache error types.

use std::fmt;

use kc_spi::TransactionError;

/// Cache operation errors.
#[derive(Debug)]
pub enum CacheError {
    /// Connection to cache backend failed.
    Connection(String),
    /// Serialization/deserialization error.
    Serialization(String),
    /// Cache operation timed out.
    Timeout,
    /// Invalid cache configuration.
    Configuration(String),
    /// An optimistic version check failed at commit time.
    ConcurrentModification {
        /// Key whose version changed since it was read.
        key: String,
    },
    /// A store was used after its unit of work completed.
    NotActive,
    /// Internal cache error.
    Internal(String),
}

impl CacheError {
    /// Returns whether re-running the unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::Timeout | Self::Connection(_)
        )
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "cache connection error: {msg}"),
            Self::Serialization(msg) => write!(f, "cache serialization error: {msg}"),
            Self::Timeout => write!(f, "cache operation timed out"),
            Self::Configuration(msg) => write!(f, "cache configuration error: {msg}"),
            Self::ConcurrentModification { key } => {
                write!(f, "concurrent modification of cache entry '{key}'")
            }
            Self::NotActive => write!(f, "cache store is no longer active"),
            Self::Internal(msg) => write!(f, "internal cache error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<CacheError> for TransactionError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ConcurrentModification { key } => Self::ConcurrentModification { key },
            CacheError::NotActive => Self::NotActive,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
