//! Transactional entry store.
//!
//! An [`EntryStore`] is the per-session view of one named cache. Writes are
//! buffered until the enclosing unit of work commits; reads see the buffer
//! first. Entries read during the unit of work are written back with an
//! optimistic version check, so two sessions updating the same entry
//! concurrently cannot silently overwrite each other.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kc_spi::{KeycloakTransaction, TransactionError, TransactionManager};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::remover::ConditionalRemover;

#[derive(Debug, Clone)]
enum PendingOp {
    Put {
        value: String,
        lifespan: Option<Duration>,
    },
    Remove,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Buffered operations in the order they were issued.
    pending: Vec<(String, PendingOp)>,
    /// What this unit of work observed in the backend; `None` is "absent".
    observed: HashMap<String, Option<u64>>,
    completed: bool,
}

impl StoreState {
    fn pending(&self, key: &str) -> Option<&PendingOp> {
        self.pending.iter().find(|(k, _)| k == key).map(|(_, op)| op)
    }

    fn buffer(&mut self, key: &str, op: PendingOp) {
        self.pending.retain(|(k, _)| k != key);
        self.pending.push((key.to_string(), op));
    }
}

/// Typed, buffered view of one named cache.
pub struct EntryStore<V> {
    cache: &'static str,
    backend: Arc<dyn CacheBackend>,
    state: Mutex<StoreState>,
    _value: PhantomData<fn() -> V>,
}

impl<V> fmt::Debug for EntryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntryStore")
            .field("cache", &self.cache)
            .field("pending", &state.pending.len())
            .field("completed", &state.completed)
            .finish_non_exhaustive()
    }
}

impl<V> EntryStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a store that is not enlisted anywhere.
    ///
    /// The caller is responsible for calling [`EntryStore::flush`].
    #[must_use]
    pub fn new(cache: &'static str, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            cache,
            backend,
            state: Mutex::new(StoreState::default()),
            _value: PhantomData,
        }
    }

    /// Creates a store and enlists it in `manager`.
    #[must_use]
    pub fn enlisted(
        cache: &'static str,
        backend: Arc<dyn CacheBackend>,
        manager: &TransactionManager,
    ) -> Arc<Self> {
        let store = Arc::new(Self::new(cache, backend));
        manager.enlist(Arc::clone(&store) as Arc<dyn KeycloakTransaction>);
        store
    }

    /// Returns the name of the underlying cache.
    #[must_use]
    pub const fn cache_name(&self) -> &'static str {
        self.cache
    }

    /// Reads an entry, seeing this unit of work's own buffered writes.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails or the value cannot be decoded.
    pub async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        let buffered = {
            let state = self.state.lock();
            if state.completed {
                return Err(CacheError::NotActive);
            }
            state.pending(key).cloned()
        };
        match buffered {
            Some(PendingOp::Put { value, .. }) => return Ok(Some(serde_json::from_str(&value)?)),
            Some(PendingOp::Remove) => return Ok(None),
            None => {}
        }

        let found = self.backend.get(self.cache, key).await?;
        self.state
            .lock()
            .observed
            .entry(key.to_string())
            .or_insert(found.as_ref().map(|v| v.version));
        found
            .map(|v| serde_json::from_str(&v.value))
            .transpose()
            .map_err(CacheError::from)
    }

    /// Buffers a write that never expires.
    ///
    /// ## Errors
    ///
    /// Returns an error if the value cannot be encoded.
    pub fn put(&self, key: &str, value: &V) -> CacheResult<()> {
        self.put_with_lifespan(key, value, None)
    }

    /// Buffers a write with an optional lifespan.
    ///
    /// ## Errors
    ///
    /// Returns an error if the value cannot be encoded or the unit of work
    /// already completed.
    pub fn put_with_lifespan(
        &self,
        key: &str,
        value: &V,
        lifespan: Option<Duration>,
    ) -> CacheResult<()> {
        let value = serde_json::to_string(value)?;
        self.buffer(key, PendingOp::Put { value, lifespan })
    }

    /// Buffers an unconditional removal.
    ///
    /// ## Errors
    ///
    /// Returns [`CacheError::NotActive`] if the unit of work completed.
    pub fn remove(&self, key: &str) -> CacheResult<()> {
        self.buffer(key, PendingOp::Remove)
    }

    /// Buffers a version-checked removal if `remover` accepts the current
    /// value. Returns whether a removal was buffered.
    ///
    /// ## Errors
    ///
    /// Returns an error if reading the current value fails.
    pub async fn remove_if(
        &self,
        key: &str,
        remover: &dyn ConditionalRemover<V>,
    ) -> CacheResult<bool> {
        match self.get(key).await? {
            Some(value) if remover.should_remove(key, &value) => {
                self.remove(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Lists the keys currently stored in the backend.
    ///
    /// Buffered writes of this unit of work are not included.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn keys(&self) -> CacheResult<Vec<String>> {
        self.backend.keys(self.cache).await
    }

    /// Applies [`EntryStore::remove_if`] to every key of the cache and
    /// returns how many removals were buffered.
    ///
    /// ## Errors
    ///
    /// Returns an error if listing or reading entries fails.
    pub async fn remove_matching(&self, remover: &dyn ConditionalRemover<V>) -> CacheResult<usize> {
        let keys = self.backend.keys(self.cache).await?;
        let mut removed = 0;
        for key in keys {
            if self.remove_if(&key, remover).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Writes every buffered operation to the backend.
    ///
    /// Each key is applied atomically; keys are not applied atomically
    /// together. The first failed version check aborts with
    /// [`CacheError::ConcurrentModification`] and leaves later keys
    /// unwritten.
    ///
    /// ## Errors
    ///
    /// Returns the conflict or backend error that stopped the flush.
    pub async fn flush(&self) -> CacheResult<()> {
        let (pending, observed) = {
            let mut state = self.state.lock();
            if state.completed {
                return Err(CacheError::NotActive);
            }
            state.completed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.observed),
            )
        };

        for (key, op) in pending {
            let applied = match (op, observed.get(&key).copied()) {
                (PendingOp::Put { value, lifespan }, Some(Some(version))) => self
                    .backend
                    .replace_if_version(self.cache, &key, value, version, lifespan)
                    .await?
                    .is_some(),
                (PendingOp::Put { value, lifespan }, Some(None)) => {
                    self.backend
                        .put_if_absent(self.cache, &key, value, lifespan)
                        .await?
                }
                (PendingOp::Put { value, lifespan }, None) => {
                    self.backend.put(self.cache, &key, value, lifespan).await?;
                    true
                }
                (PendingOp::Remove, Some(Some(version))) => {
                    self.backend
                        .remove_if_version(self.cache, &key, version)
                        .await?
                }
                (PendingOp::Remove, _) => {
                    self.backend.remove(self.cache, &key).await?;
                    true
                }
            };

            if !applied {
                tracing::debug!(
                    "Optimistic check failed for {} in cache {}",
                    key,
                    self.cache
                );
                return Err(CacheError::ConcurrentModification { key });
            }
        }
        Ok(())
    }

    /// Discards every buffered operation.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.observed.clear();
        state.completed = true;
    }

    fn buffer(&self, key: &str, op: PendingOp) -> CacheResult<()> {
        let mut state = self.state.lock();
        if state.completed {
            return Err(CacheError::NotActive);
        }
        state.buffer(key, op);
        Ok(())
    }
}

#[async_trait]
impl<V> KeycloakTransaction for EntryStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn commit(&self) -> Result<(), TransactionError> {
        self.flush().await.map_err(TransactionError::from)
    }

    async fn rollback(&self) -> Result<(), TransactionError> {
        self.discard();
        Ok(())
    }
}
