//! Cluster membership checks.
//!
//! Every node publishes its compatibility metadata in the `work` cache.
//! A node joining a cluster compares the published metadata with its own
//! and refuses to start next to an incompatible node.

use std::collections::BTreeMap;

use kc_cache::{CacheBackend, caches};
use kc_core::config::CacheBackendKind;
use kc_core::{CompatibilityResult, CompatibilityVersionChecker};

use crate::config::ServerConfig;

/// Key of the published metadata in the `work` cache.
pub const METADATA_KEY: &str = "compatibility::metadata";

/// Metadata attribute naming the cache backend kind.
pub const CACHE_BACKEND_ATTRIBUTE: &str = "cacheBackend";

/// Builds the checker describing this node.
#[must_use]
pub fn checker(config: &ServerConfig) -> CompatibilityVersionChecker {
    let backend = match config.core.cache.backend {
        CacheBackendKind::Embedded => "embedded",
        CacheBackendKind::Remote => "remote",
    };
    CompatibilityVersionChecker::new(config.core.node.version.clone(), &config.core.features)
        .with_attribute(CACHE_BACKEND_ATTRIBUTE, backend)
}

/// Attempts at publishing before giving up on a contended record.
const PUBLISH_ATTEMPTS: usize = 5;

/// Compares the metadata published by the cluster with ours and publishes
/// ours when they are compatible.
///
/// The record is only written if it is still the one that was checked, so
/// two nodes joining at once cannot both pass against a stale record.
///
/// ## Errors
///
/// Fails if the published metadata is incompatible or unreadable, if the
/// record keeps changing underneath us, or if the cache fails.
pub async fn join_cluster(
    backend: &dyn CacheBackend,
    checker: &CompatibilityVersionChecker,
) -> anyhow::Result<CompatibilityResult> {
    let ours = serde_json::to_string(checker.metadata())?;

    for attempt in 1..=PUBLISH_ATTEMPTS {
        let published = backend.get(caches::WORK, METADATA_KEY).await?;
        let result = match &published {
            Some(published) => {
                let remote: BTreeMap<String, String> = serde_json::from_str(&published.value)?;
                checker.is_compatible(&remote)
            }
            None => CompatibilityResult::AllEqual,
        };

        if let Some(attributes) = result.incompatible_attributes() {
            anyhow::bail!(
                "node is incompatible with the running cluster, mismatching attributes: {}",
                attributes.join(", ")
            );
        }

        let written = match published {
            Some(published) => backend
                .replace_if_version(caches::WORK, METADATA_KEY, ours.clone(), published.version, None)
                .await?
                .is_some(),
            None => {
                backend
                    .put_if_absent(caches::WORK, METADATA_KEY, ours.clone(), None)
                    .await?
            }
        };
        if written {
            tracing::info!("Published compatibility metadata: {:?}", result);
            return Ok(result);
        }
        tracing::debug!(
            "Compatibility metadata changed while joining, attempt {}/{}",
            attempt,
            PUBLISH_ATTEMPTS
        );
    }

    anyhow::bail!("compatibility metadata kept changing while joining the cluster")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use kc_cache::{CacheResult, InMemoryCacheBackend, VersionedValue};
    use kc_core::Feature;
    use parking_lot::Mutex;

    use super::*;

    fn node(version: &str) -> ServerConfig {
        let mut config = ServerConfig::for_testing("node");
        config.core.node.version = version.to_string();
        config
    }

    #[tokio::test]
    async fn first_node_publishes_metadata() {
        let backend = InMemoryCacheBackend::new();
        let checker = checker(&node("26.1.0"));

        let result = join_cluster(&backend, &checker).await.unwrap();

        assert_eq!(result, CompatibilityResult::AllEqual);
        let published = backend.get(caches::WORK, METADATA_KEY).await.unwrap().unwrap();
        let metadata: BTreeMap<String, String> = serde_json::from_str(&published.value).unwrap();
        assert_eq!(&metadata, checker.metadata());
    }

    #[tokio::test]
    async fn different_version_is_rejected_without_rolling_updates() {
        let backend = InMemoryCacheBackend::new();
        join_cluster(&backend, &checker(&node("26.1.0"))).await.unwrap();

        let error = join_cluster(&backend, &checker(&node("26.1.1")))
            .await
            .unwrap_err();

        assert!(error.to_string().contains("version"));
    }

    #[tokio::test]
    async fn patch_upgrade_is_accepted_with_rolling_updates() {
        let backend = InMemoryCacheBackend::new();
        join_cluster(&backend, &checker(&node("26.1.0"))).await.unwrap();
        let mut upgraded = node("26.1.1");
        upgraded.core.features = upgraded.core.features.with(Feature::RollingUpdatesV2);

        let result = join_cluster(&backend, &checker(&upgraded)).await.unwrap();

        assert!(matches!(result, CompatibilityResult::ProviderCompatible { .. }));
    }

    #[tokio::test]
    async fn cache_backend_mismatch_is_rejected() {
        let backend = InMemoryCacheBackend::new();
        join_cluster(&backend, &checker(&node("26.1.0"))).await.unwrap();
        let mut remote = node("26.1.0");
        remote.core.cache.backend = CacheBackendKind::Remote;

        let error = join_cluster(&backend, &checker(&remote)).await.unwrap_err();

        assert!(error.to_string().contains(CACHE_BACKEND_ATTRIBUTE));
    }

    /// Backend on which another node publishes right after our first read.
    #[derive(Debug)]
    struct ConcurrentJoin {
        inner: InMemoryCacheBackend,
        other_node: Mutex<Option<String>>,
    }

    #[async_trait]
    impl CacheBackend for ConcurrentJoin {
        async fn get(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>> {
            let found = self.inner.get(cache, key).await?;
            let other_node = self.other_node.lock().take();
            if let Some(metadata) = other_node {
                self.inner.put(cache, key, metadata, None).await?;
            }
            Ok(found)
        }

        async fn put(
            &self,
            cache: &str,
            key: &str,
            value: String,
            lifespan: Option<Duration>,
        ) -> CacheResult<u64> {
            self.inner.put(cache, key, value, lifespan).await
        }

        async fn put_if_absent(
            &self,
            cache: &str,
            key: &str,
            value: String,
            lifespan: Option<Duration>,
        ) -> CacheResult<bool> {
            self.inner.put_if_absent(cache, key, value, lifespan).await
        }

        async fn replace(
            &self,
            cache: &str,
            key: &str,
            value: String,
            lifespan: Option<Duration>,
        ) -> CacheResult<Option<u64>> {
            self.inner.replace(cache, key, value, lifespan).await
        }

        async fn replace_if_version(
            &self,
            cache: &str,
            key: &str,
            value: String,
            expected: u64,
            lifespan: Option<Duration>,
        ) -> CacheResult<Option<u64>> {
            self.inner
                .replace_if_version(cache, key, value, expected, lifespan)
                .await
        }

        async fn remove(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>> {
            self.inner.remove(cache, key).await
        }

        async fn remove_if_version(&self, cache: &str, key: &str, expected: u64) -> CacheResult<bool> {
            self.inner.remove_if_version(cache, key, expected).await
        }

        async fn keys(&self, cache: &str) -> CacheResult<Vec<String>> {
            self.inner.keys(cache).await
        }

        async fn clear(&self, cache: &str) -> CacheResult<()> {
            self.inner.clear(cache).await
        }
    }

    fn racing_with(other: &ServerConfig) -> ConcurrentJoin {
        ConcurrentJoin {
            inner: InMemoryCacheBackend::new(),
            other_node: Mutex::new(Some(
                serde_json::to_string(checker(other).metadata()).unwrap(),
            )),
        }
    }

    #[tokio::test]
    async fn simultaneous_first_join_sees_the_other_node() {
        let backend = racing_with(&node("26.1.0"));

        let error = join_cluster(&backend, &checker(&node("25.0.9")))
            .await
            .unwrap_err();

        assert!(error.to_string().contains("version"));
        let published = backend.get(caches::WORK, METADATA_KEY).await.unwrap().unwrap();
        let metadata: BTreeMap<String, String> = serde_json::from_str(&published.value).unwrap();
        assert_eq!(&metadata, checker(&node("26.1.0")).metadata());
    }

    #[tokio::test]
    async fn record_replaced_after_the_check_is_checked_again() {
        let backend = racing_with(&node("26.1.0"));
        backend
            .inner
            .put(
                caches::WORK,
                METADATA_KEY,
                serde_json::to_string(checker(&node("25.0.9")).metadata()).unwrap(),
                None,
            )
            .await
            .unwrap();
        let mut upgraded = node("25.0.10");
        upgraded.core.features = upgraded.core.features.with(Feature::RollingUpdatesV2);

        let error = join_cluster(&backend, &checker(&upgraded)).await.unwrap_err();

        assert!(error.to_string().contains("version"));
    }

    #[tokio::test]
    async fn compatible_concurrent_join_publishes_after_retrying() {
        let backend = racing_with(&node("26.1.0"));

        let result = join_cluster(&backend, &checker(&node("26.1.0"))).await.unwrap();

        assert_eq!(result, CompatibilityResult::AllEqual);
    }
}
