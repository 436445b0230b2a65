//! Configuration management for Keycloak Rust.
//!
//! The configuration is plain data: it is built once at process start
//! (from environment variables in `kc-server`, or programmatically in tests)
//! and handed to the components that need it.

use serde::{Deserialize, Serialize};

use crate::profile::Profile;

/// Main configuration structure for a cluster node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this node inside the cluster.
    pub node: NodeConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Session timeouts and maintenance.
    pub session: SessionConfig,
    /// Enabled features.
    #[serde(default)]
    pub features: Profile,
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name, used as lock owner for cluster-wide tasks.
    pub name: String,
    /// Version string advertised to other nodes (`major.minor.micro`).
    pub version: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node-1".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Which cache backend holds the shared cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process cache, only shared between sessions of this node.
    #[default]
    Embedded,
    /// Remote Redis cache shared by all nodes.
    Remote,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backend kind.
    pub backend: CacheBackendKind,
    /// Redis connection URL, used when `backend` is `Remote`.
    pub redis_url: String,
    /// Whether revoked tokens are reloaded into the single-use cache on startup.
    pub persist_revoked_tokens: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Embedded,
            redis_url: "redis://localhost:6379".to_string(),
            persist_revoked_tokens: true,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout of a user session in seconds.
    pub idle_timeout_secs: i64,
    /// Maximum lifespan of a user session in seconds.
    pub max_lifespan_secs: i64,
    /// Interval of the cluster-wide expired session sweep in seconds.
    pub expiration_interval_secs: u64,
    /// Lifespan of authorization codes in seconds.
    pub code_lifespan_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            max_lifespan_secs: 36000,
            expiration_interval_secs: 900,
            code_lifespan_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Feature;

    #[test]
    fn default_config_uses_embedded_cache() {
        let config = Config::default();

        assert_eq!(config.cache.backend, CacheBackendKind::Embedded);
        assert!(config.cache.persist_revoked_tokens);
        assert_eq!(config.session.code_lifespan_secs, 60);
        assert!(!config.features.is_enabled(Feature::RollingUpdatesV2));
    }

    #[test]
    fn session_timeouts_are_ordered() {
        let config = SessionConfig::default();
        assert!(config.idle_timeout_secs < config.max_lifespan_secs);
    }
}
