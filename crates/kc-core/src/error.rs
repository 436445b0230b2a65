//! Error handling for Keycloak Rust.
//!
//! Crate-specific errors (cache, session, authorization) convert into this
//! type at process boundaries. Messages stay generic for client-facing
//! variants.

use thiserror::Error;

/// Result type alias using the Keycloak error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Keycloak operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cache backend error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Optimistic write conflict; the caller may re-read and retry.
    #[error("concurrent modification of '{0}'")]
    ConcurrentModification(String),

    /// Authorization error.
    #[error("access denied")]
    Authorization,

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Internal error.
    #[error("internal error")]
    Internal,
}

impl Error {
    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Cache(_) | Self::Internal)
    }

    /// Returns whether retrying the unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_error_is_generic() {
        assert_eq!(Error::Authorization.to_string(), "access denied");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(Error::ConcurrentModification("code".into()).is_retryable());
        assert!(!Error::Cache("down".into()).is_retryable());
        assert!(Error::Cache("down".into()).is_server_error());
    }
}
