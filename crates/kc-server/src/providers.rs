//! Provider wiring for the server.
//!
//! Selects the cache backend and registers every provider factory the node
//! runs with.

use std::sync::Arc;

use kc_authz::{AUTHORIZATION_SPI, AuthorizationProviderFactory, AuthorizationSpi, AuthorizationStore};
use kc_cache::{
    CLUSTER_SPI, CacheBackend, ClusterProviderFactory, ClusterSpi, InMemoryCacheBackend,
    InMemoryRevokedTokenPersister, RevokedTokenPersister, SINGLE_USE_OBJECT_SPI,
    SingleUseObjectProviderFactory, SingleUseObjectSpi,
};
use kc_cache_redis::{RedisCacheBackend, RedisConfig};
use kc_core::Feature;
use kc_core::config::CacheBackendKind;
use kc_core::event::{EventListener, TracingEventListener};
use kc_session::{USER_SESSION_SPI, UserSessionProviderFactory, UserSessionSpi};
use kc_spi::SpiRegistry;

use crate::config::ServerConfig;

/// Connects the configured cache backend.
///
/// ## Errors
///
/// Returns an error if the remote cache cannot be reached.
pub async fn cache_backend(config: &ServerConfig) -> anyhow::Result<Arc<dyn CacheBackend>> {
    match config.core.cache.backend {
        CacheBackendKind::Embedded => {
            tracing::info!("Using embedded cache backend");
            Ok(Arc::new(InMemoryCacheBackend::new()))
        }
        CacheBackendKind::Remote => {
            let mut redis = RedisConfig::new().url(config.core.cache.redis_url.clone());
            if let Some(timeout_ms) = config.redis_command_timeout_ms {
                redis = redis.command_timeout_ms(timeout_ms);
            }
            let backend = RedisCacheBackend::new(redis).await?;
            tracing::info!("Using remote cache backend");
            Ok(Arc::new(backend))
        }
    }
}

/// Registers the provider factories of a node.
#[must_use]
pub fn build_registry(
    config: &ServerConfig,
    backend: &Arc<dyn CacheBackend>,
    authorization: &Arc<AuthorizationStore>,
    listener: Arc<dyn EventListener>,
) -> SpiRegistry {
    let registry = SpiRegistry::new();

    let persister = config
        .core
        .cache
        .persist_revoked_tokens
        .then(|| Arc::new(InMemoryRevokedTokenPersister::new()) as Arc<dyn RevokedTokenPersister>);
    registry.register(
        &SingleUseObjectSpi,
        SingleUseObjectProviderFactory::new(Arc::clone(backend), persister),
    );
    registry.set_default(SINGLE_USE_OBJECT_SPI, SingleUseObjectProviderFactory::ID);

    registry.register(
        &ClusterSpi,
        ClusterProviderFactory::new(Arc::clone(backend), config.core.node.name.clone()),
    );
    registry.set_default(CLUSTER_SPI, ClusterProviderFactory::ID);

    registry.register(&UserSessionSpi, UserSessionProviderFactory::new(Arc::clone(backend)));
    registry.set_default(USER_SESSION_SPI, UserSessionProviderFactory::ID);

    if config.core.features.is_enabled(Feature::Authorization) {
        registry.register(
            &AuthorizationSpi,
            AuthorizationProviderFactory::new(Arc::clone(authorization)).with_event_listener(listener),
        );
        registry.set_default(AUTHORIZATION_SPI, AuthorizationProviderFactory::ID);
    } else {
        tracing::info!("Authorization services disabled");
    }

    registry
}

/// Returns the listener that receives the node's events.
#[must_use]
pub fn event_listener() -> Arc<dyn EventListener> {
    Arc::new(TracingEventListener)
}

#[cfg(test)]
mod tests {
    use kc_core::Profile;

    use super::*;

    fn registry_for(config: &ServerConfig) -> SpiRegistry {
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        build_registry(config, &backend, &Arc::new(AuthorizationStore::new()), event_listener())
    }

    #[test]
    fn registers_default_providers() {
        let registry = registry_for(&ServerConfig::for_testing("node-a"));

        assert_eq!(registry.get_default(SINGLE_USE_OBJECT_SPI), Some("default"));
        assert_eq!(registry.get_default(CLUSTER_SPI), Some("default"));
        assert_eq!(registry.get_default(USER_SESSION_SPI), Some("default"));
        assert!(
            registry
                .default_factory::<AuthorizationProviderFactory>(AUTHORIZATION_SPI)
                .is_some()
        );
    }

    #[test]
    fn authorization_follows_the_feature_flag() {
        let mut config = ServerConfig::for_testing("node-a");
        config.core.features = Profile::empty();

        let registry = registry_for(&config);

        assert!(registry.list_providers(AUTHORIZATION_SPI).is_empty());
    }

    #[test]
    fn revoked_token_persistence_follows_config() {
        let mut config = ServerConfig::for_testing("node-a");
        config.core.cache.persist_revoked_tokens = false;

        let registry = registry_for(&config);
        let factory = registry
            .default_factory::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)
            .unwrap();

        assert!(!factory.persists_revoked_tokens());
    }
}
