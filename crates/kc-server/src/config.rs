//! Server configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::str::FromStr;
use std::time::Duration;

use kc_cache::{CLUSTER_SPI, SINGLE_USE_OBJECT_SPI};
use kc_core::config::CacheBackendKind;
use kc_core::{Config, Profile};
use kc_spi::ProviderConfig;

/// Server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Node, cache, session and feature settings.
    pub core: Config,

    /// Redis command timeout in milliseconds.
    pub redis_command_timeout_ms: Option<u64>,

    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// ## Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut core = Config::default();

        if let Ok(name) = std::env::var("KC_NODE_NAME") {
            core.node.name = name;
        }
        if let Ok(version) = std::env::var("KC_NODE_VERSION") {
            core.node.version = version;
        }

        core.cache.backend = match std::env::var("KC_CACHE_BACKEND").as_deref() {
            Ok("remote") => CacheBackendKind::Remote,
            Ok("embedded") | Err(_) => CacheBackendKind::Embedded,
            Ok(other) => anyhow::bail!("KC_CACHE_BACKEND must be 'embedded' or 'remote', got '{other}'"),
        };
        if let Ok(url) = std::env::var("KC_REDIS_URL").or_else(|_| std::env::var("REDIS_URL")) {
            core.cache.redis_url = url;
        }
        core.cache.persist_revoked_tokens =
            env_or("KC_PERSIST_REVOKED_TOKENS", core.cache.persist_revoked_tokens);

        core.session.idle_timeout_secs =
            env_or("KC_SESSION_IDLE_TIMEOUT", core.session.idle_timeout_secs);
        core.session.max_lifespan_secs =
            env_or("KC_SESSION_MAX_LIFESPAN", core.session.max_lifespan_secs);
        core.session.expiration_interval_secs =
            env_or("KC_SESSION_EXPIRATION_INTERVAL", core.session.expiration_interval_secs);
        core.session.code_lifespan_secs =
            env_or("KC_AUTH_CODE_LIFESPAN", core.session.code_lifespan_secs);

        if let Ok(features) = std::env::var("KC_FEATURES") {
            core.features = Profile::parse(&features);
        }

        if core.session.idle_timeout_secs <= 0 || core.session.max_lifespan_secs <= 0 {
            anyhow::bail!("session timeouts must be positive");
        }

        let redis_command_timeout_ms = std::env::var("KC_REDIS_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok());

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            core,
            redis_command_timeout_ms,
            log_level,
        })
    }

    /// Creates a configuration for testing: embedded cache, short sweeps.
    #[must_use]
    pub fn for_testing(node_name: &str) -> Self {
        let mut core = Config::default();
        core.node.name = node_name.to_string();
        core.session.expiration_interval_secs = 1;
        Self {
            core,
            redis_command_timeout_ms: None,
            log_level: "debug".to_string(),
        }
    }

    /// Returns the per-provider settings derived from this configuration.
    #[must_use]
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new()
            .set(
                SINGLE_USE_OBJECT_SPI,
                "default",
                "persistRevokedTokens",
                self.core.cache.persist_revoked_tokens.to_string(),
            )
            .set(CLUSTER_SPI, "default", "nodeName", self.core.node.name.clone())
    }

    /// Returns the interval of the expired session sweep.
    #[must_use]
    pub fn expiration_interval(&self) -> Duration {
        Duration::from_secs(self.core.session.expiration_interval_secs.max(1))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
