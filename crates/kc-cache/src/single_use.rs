//! Single-use objects.
//!
//! Authorization codes, action tokens and revoked token ids are short-lived
//! entries that must be consumable exactly once across the cluster. The
//! tracker talks to the backend directly instead of buffering in the unit
//! of work, so a consume is decided by one atomic backend operation.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kc_spi::{
    FactoryConfig, KeycloakSession, Provider, ProviderFactory, ProviderMetadata, Spi, SpiError,
};
use tokio::sync::Mutex;

use crate::backend::{CacheBackend, caches};
use crate::error::{CacheError, CacheResult};

/// Name of the single-use object SPI.
pub const SINGLE_USE_OBJECT_SPI: &str = "singleUseObject";

/// Suffix of keys marking a revoked token id.
pub const REVOKED_KEY: &str = ".revoked";

/// Marker entry telling nodes the persisted revoked tokens are loaded.
pub const LOADED: &str = "loaded.revoked";

/// Notes stored with a single-use object.
pub type Notes = HashMap<String, String>;

/// The single-use object SPI.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleUseObjectSpi;

impl Spi for SingleUseObjectSpi {
    fn name(&self) -> &'static str {
        SINGLE_USE_OBJECT_SPI
    }

    fn is_internal(&self) -> bool {
        true
    }
}

/// Durable storage of revoked token ids, so revocations survive a full
/// cluster restart.
#[async_trait]
pub trait RevokedTokenPersister: Send + Sync + Debug {
    /// Records a revoked token until `expires_at`.
    async fn persist(&self, token_id: &str, expires_at: DateTime<Utc>) -> CacheResult<()>;

    /// Returns every revoked token that has not expired yet.
    async fn load(&self) -> CacheResult<Vec<(String, DateTime<Utc>)>>;
}

/// Process-local [`RevokedTokenPersister`].
#[derive(Debug, Default)]
pub struct InMemoryRevokedTokenPersister {
    tokens: DashMap<String, DateTime<Utc>>,
}

impl InMemoryRevokedTokenPersister {
    /// Creates an empty persister.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevokedTokenPersister for InMemoryRevokedTokenPersister {
    async fn persist(&self, token_id: &str, expires_at: DateTime<Utc>) -> CacheResult<()> {
        self.tokens.insert(token_id.to_string(), expires_at);
        Ok(())
    }

    async fn load(&self) -> CacheResult<Vec<(String, DateTime<Utc>)>> {
        let now = Utc::now();
        self.tokens.retain(|_, expires_at| *expires_at > now);
        Ok(self
            .tokens
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect())
    }
}

/// Shared state for loading persisted revocations into the cache once.
#[derive(Debug)]
struct RevokedTokens {
    persister: Option<Arc<dyn RevokedTokenPersister>>,
    enabled: AtomicBool,
    loaded: AtomicBool,
    load_lock: Mutex<()>,
}

impl RevokedTokens {
    fn persister(&self) -> Option<&Arc<dyn RevokedTokenPersister>> {
        if self.enabled.load(Ordering::Acquire) {
            self.persister.as_ref()
        } else {
            None
        }
    }

    async fn ensure_loaded(&self, backend: &dyn CacheBackend) -> CacheResult<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(persister) = self.persister() else {
            self.loaded.store(true, Ordering::Release);
            return Ok(());
        };

        let _guard = self.load_lock.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        if backend.get(caches::ACTION_TOKENS, LOADED).await?.is_none() {
            let now = Utc::now();
            let tokens = persister.load().await?;
            let count = tokens.len();
            for (token_id, expires_at) in tokens {
                let Ok(remaining) = (expires_at - now).to_std() else {
                    continue;
                };
                backend
                    .put(
                        caches::ACTION_TOKENS,
                        &format!("{token_id}{REVOKED_KEY}"),
                        serde_json::to_string(&Notes::new())?,
                        Some(remaining),
                    )
                    .await?;
            }
            backend
                .put(caches::ACTION_TOKENS, LOADED, serde_json::to_string(&Notes::new())?, None)
                .await?;
            tracing::debug!("Loaded {} persisted revoked tokens", count);
        }

        self.loaded.store(true, Ordering::Release);
        Ok(())
    }
}

/// Per-session access to single-use objects.
#[derive(Debug, Clone)]
pub struct SingleUseObjectTracker {
    backend: Arc<dyn CacheBackend>,
    revoked: Arc<RevokedTokens>,
}

impl Provider for SingleUseObjectTracker {}

impl SingleUseObjectTracker {
    /// Creates a tracker without revoked-token persistence.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            revoked: Arc::new(RevokedTokens {
                persister: None,
                enabled: AtomicBool::new(false),
                loaded: AtomicBool::new(true),
                load_lock: Mutex::new(()),
            }),
        }
    }

    /// Stores `notes` under `key` for `lifespan_seconds`.
    ///
    /// Keys ending in [`REVOKED_KEY`] are also handed to the revoked token
    /// persister when persistence is enabled.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend or the persister fails.
    pub async fn put(&self, key: &str, lifespan_seconds: u64, notes: &Notes) -> CacheResult<()> {
        let lifespan = Duration::from_secs(lifespan_seconds);
        self.backend
            .put(
                caches::ACTION_TOKENS,
                key,
                serde_json::to_string(notes)?,
                Some(lifespan),
            )
            .await?;

        if let Some(token_id) = key.strip_suffix(REVOKED_KEY) {
            if let Some(persister) = self.revoked.persister() {
                let expires_at = Utc::now()
                    + chrono::Duration::from_std(lifespan)
                        .map_err(|e| CacheError::Internal(e.to_string()))?;
                persister.persist(token_id, expires_at).await?;
            }
        }
        tracing::trace!("Stored single-use object {}", key);
        Ok(())
    }

    /// Reads the notes stored under `key` without consuming them.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails or the notes cannot be decoded.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Notes>> {
        self.backend
            .get(caches::ACTION_TOKENS, key)
            .await?
            .map(|v| serde_json::from_str(&v.value))
            .transpose()
            .map_err(CacheError::from)
    }

    /// Consumes `key`.
    ///
    /// Returns the notes if and only if this caller removed the entry; of
    /// any number of concurrent callers on any node, at most one gets
    /// `Some`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails or the notes cannot be decoded.
    pub async fn remove(&self, key: &str) -> CacheResult<Option<Notes>> {
        let removed = self.backend.remove(caches::ACTION_TOKENS, key).await?;
        if removed.is_none() {
            tracing::debug!("Single-use object {} already used or expired", key);
        }
        removed
            .map(|v| serde_json::from_str(&v.value))
            .transpose()
            .map_err(CacheError::from)
    }

    /// Replaces the notes of `key` if it is still present, keeping its
    /// expiry. Returns whether the entry existed.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn replace(&self, key: &str, notes: &Notes) -> CacheResult<bool> {
        let replaced = self
            .backend
            .replace(caches::ACTION_TOKENS, key, serde_json::to_string(notes)?, None)
            .await?;
        Ok(replaced.is_some())
    }

    /// Stores an empty entry under `key` unless one exists.
    ///
    /// Returns `true` if this caller created the entry.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn put_if_absent(&self, key: &str, lifespan_seconds: u64) -> CacheResult<bool> {
        self.backend
            .put_if_absent(
                caches::ACTION_TOKENS,
                key,
                serde_json::to_string(&Notes::new())?,
                Some(Duration::from_secs(lifespan_seconds)),
            )
            .await
    }

    /// Returns whether `key` is present.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails or persisted revocations
    /// cannot be loaded.
    pub async fn contains(&self, key: &str) -> CacheResult<bool> {
        if key.ends_with(REVOKED_KEY) {
            self.revoked.ensure_loaded(self.backend.as_ref()).await?;
        }
        Ok(self.backend.get(caches::ACTION_TOKENS, key).await?.is_some())
    }

    /// Marks `token_id` as revoked for `lifespan_seconds`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend or the persister fails.
    pub async fn revoke(&self, token_id: &str, lifespan_seconds: u64) -> CacheResult<()> {
        self.put(&format!("{token_id}{REVOKED_KEY}"), lifespan_seconds, &Notes::new())
            .await
    }

    /// Returns whether `token_id` has been revoked.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn is_revoked(&self, token_id: &str) -> CacheResult<bool> {
        self.contains(&format!("{token_id}{REVOKED_KEY}")).await
    }
}

/// Factory of [`SingleUseObjectTracker`]s.
///
/// Configuration: `persistRevokedTokens` (default `true`) enables writing
/// revocations through to the persister and loading them back into the
/// cache on first use.
#[derive(Debug)]
pub struct SingleUseObjectProviderFactory {
    backend: Arc<dyn CacheBackend>,
    revoked: Arc<RevokedTokens>,
}

impl SingleUseObjectProviderFactory {
    /// Provider ID.
    pub const ID: &'static str = "default";

    /// Creates a factory over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        persister: Option<Arc<dyn RevokedTokenPersister>>,
    ) -> Self {
        let enabled = persister.is_some();
        Self {
            backend,
            revoked: Arc::new(RevokedTokens {
                persister,
                enabled: AtomicBool::new(enabled),
                loaded: AtomicBool::new(false),
                load_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns whether revoked tokens are persisted.
    #[must_use]
    pub fn persists_revoked_tokens(&self) -> bool {
        self.revoked.persister().is_some()
    }
}

impl ProviderFactory for SingleUseObjectProviderFactory {
    type Provider = SingleUseObjectTracker;

    fn id(&self) -> &'static str {
        Self::ID
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: Self::ID,
            name: "Single-use objects",
            description: "Exactly-once consumable codes, action tokens and revocations",
            priority: 0,
        }
    }

    fn init(&self, config: &dyn FactoryConfig) -> Result<(), SpiError> {
        let persist = config.get_bool("persistRevokedTokens", true);
        if persist && self.revoked.persister.is_none() {
            tracing::warn!("Revoked token persistence requested but no persister is configured");
        }
        self.revoked.enabled.store(persist, Ordering::Release);
        Ok(())
    }

    fn create(&self, _session: &KeycloakSession) -> Result<SingleUseObjectTracker, SpiError> {
        Ok(SingleUseObjectTracker {
            backend: Arc::clone(&self.backend),
            revoked: Arc::clone(&self.revoked),
        })
    }
}
