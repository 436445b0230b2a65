//! Embedded cache backend.
//!
//! Keeps every named cache in a [`DashMap`]. Nodes that share one
//! [`InMemoryCacheBackend`] behave like members of the same cluster, which
//! is how single-process deployments and tests run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::backend::{CacheBackend, VersionedValue};
use crate::error::CacheResult;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn to_versioned(&self) -> VersionedValue {
        VersionedValue {
            value: self.value.clone(),
            version: self.version,
        }
    }
}

type CacheMap = Arc<DashMap<String, StoredEntry>>;

/// In-process [`CacheBackend`].
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    caches: DashMap<String, CacheMap>,
    versions: AtomicU64,
}

impl InMemoryCacheBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries from every cache and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for cache in &self.caches {
            let before = cache.len();
            cache.retain(|_, entry| !entry.is_expired(now));
            purged += before - cache.len();
        }
        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    fn cache(&self, name: &str) -> CacheMap {
        if let Some(cache) = self.caches.get(name) {
            return Arc::clone(&cache);
        }
        Arc::clone(&self.caches.entry(name.to_string()).or_default())
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn new_entry(&self, value: String, lifespan: Option<Duration>, now: Instant) -> StoredEntry {
        StoredEntry {
            value,
            version: self.next_version(),
            expires_at: lifespan.map(|l| now + l),
        }
    }

    fn rewrite(
        &self,
        entry: &mut StoredEntry,
        value: String,
        lifespan: Option<Duration>,
        now: Instant,
    ) -> u64 {
        entry.value = value;
        entry.version = self.next_version();
        if let Some(lifespan) = lifespan {
            entry.expires_at = Some(now + lifespan);
        }
        entry.version
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>> {
        let now = Instant::now();
        let cache = self.cache(cache);
        let found = cache.get(key).map(|e| (e.is_expired(now), e.to_versioned()));
        match found {
            Some((false, value)) => Ok(Some(value)),
            Some((true, _)) => {
                cache.remove_if(key, |_, e| e.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<u64> {
        let entry = self.new_entry(value, lifespan, Instant::now());
        let version = entry.version;
        self.cache(cache).insert(key.to_string(), entry);
        Ok(version)
    }

    async fn put_if_absent(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<bool> {
        let now = Instant::now();
        let cache = self.cache(cache);
        let stored = match cache.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(self.new_entry(value, lifespan, now));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.new_entry(value, lifespan, now));
                true
            }
        };
        Ok(stored)
    }

    async fn replace(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<Option<u64>> {
        let now = Instant::now();
        let cache = self.cache(cache);
        let mut entry = match cache.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => entry,
            _ => return Ok(None),
        };
        Ok(Some(self.rewrite(&mut entry, value, lifespan, now)))
    }

    async fn replace_if_version(
        &self,
        cache: &str,
        key: &str,
        value: String,
        expected: u64,
        lifespan: Option<Duration>,
    ) -> CacheResult<Option<u64>> {
        let now = Instant::now();
        let cache = self.cache(cache);
        let mut entry = match cache.get_mut(key) {
            Some(entry) if !entry.is_expired(now) && entry.version == expected => entry,
            _ => return Ok(None),
        };
        Ok(Some(self.rewrite(&mut entry, value, lifespan, now)))
    }

    async fn remove(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>> {
        let now = Instant::now();
        let removed = self
            .cache(cache)
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| VersionedValue {
                value: entry.value,
                version: entry.version,
            });
        Ok(removed)
    }

    async fn remove_if_version(&self, cache: &str, key: &str, expected: u64) -> CacheResult<bool> {
        let now = Instant::now();
        let removed = self
            .cache(cache)
            .remove_if(key, |_, e| !e.is_expired(now) && e.version == expected);
        Ok(removed.is_some())
    }

    async fn keys(&self, cache: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .cache(cache)
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn clear(&self, cache: &str) -> CacheResult<()> {
        self.cache(cache).clear();
        Ok(())
    }
}
