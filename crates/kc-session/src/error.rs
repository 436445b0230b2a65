//! Session error types.

use kc_cache::CacheError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session not found.
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    /// Session expired.
    #[error("Session expired: {0}")]
    Expired(Uuid),

    /// Client session not found within user session.
    #[error("Client session not found for client: {0}")]
    ClientSessionNotFound(String),

    /// The operation is not allowed on this view.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Backing cache failure, including optimistic conflicts.
    #[error("Session storage error: {0}")]
    Cache(#[from] CacheError),

    /// Internal error.
    #[error("Internal session error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Checks if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ClientSessionNotFound(_))
    }

    /// Checks if this is an expiration error.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_))
    }

    /// Checks if re-running the unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
