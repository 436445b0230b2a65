//! Cache backend contract.
//!
//! A backend stores opaque serialized values in named caches. Every entry
//! carries a version that changes on each write, which is what the
//! optimistic [`EntryStore`](crate::EntryStore) checks at commit time.
//! All single-key operations are atomic with respect to each other, both
//! in process and across nodes sharing the backend.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Names of the replicated caches.
pub mod caches {
    /// Single-use objects: action tokens, used codes, revoked tokens.
    pub const ACTION_TOKENS: &str = "actionTokens";
    /// Cluster coordination entries.
    pub const WORK: &str = "work";
    /// User sessions.
    pub const SESSIONS: &str = "sessions";
    /// Client sessions.
    pub const CLIENT_SESSIONS: &str = "clientSessions";
}

/// A serialized value together with its entry version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Serialized value.
    pub value: String,
    /// Version assigned by the backend on the last write.
    pub version: u64,
}

/// Shared, replicated key-value storage.
///
/// Implementations must be thread-safe and support concurrent access.
/// Expired entries behave exactly like absent ones.
///
/// ## Lifespans
///
/// `put` and `put_if_absent` treat a `None` lifespan as "never expires".
/// The `replace` operations treat `None` as "keep the current expiry".
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    /// Gets an entry.
    async fn get(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>>;

    /// Writes an entry unconditionally and returns its new version.
    async fn put(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<u64>;

    /// Writes an entry only if the key is absent.
    ///
    /// Returns `true` if the value was stored.
    async fn put_if_absent(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Overwrites an entry only if it exists.
    ///
    /// Returns the new version, or `None` if the key was absent.
    async fn replace(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<Option<u64>>;

    /// Overwrites an entry only if its version still equals `expected`.
    ///
    /// Returns the new version, or `None` if the entry changed or vanished.
    async fn replace_if_version(
        &self,
        cache: &str,
        key: &str,
        value: String,
        expected: u64,
        lifespan: Option<Duration>,
    ) -> CacheResult<Option<u64>>;

    /// Removes an entry and returns what was stored.
    ///
    /// Of several concurrent callers, at most one observes `Some`.
    async fn remove(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>>;

    /// Removes an entry only if its version still equals `expected`.
    async fn remove_if_version(&self, cache: &str, key: &str, expected: u64) -> CacheResult<bool>;

    /// Lists the live keys of a cache.
    async fn keys(&self, cache: &str) -> CacheResult<Vec<String>>;

    /// Removes every entry of a cache.
    ///
    /// Use with caution in production!
    async fn clear(&self, cache: &str) -> CacheResult<()>;
}
