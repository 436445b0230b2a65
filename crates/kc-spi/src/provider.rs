//! Provider traits for the SPI system.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use thiserror::Error;

use crate::session::{KeycloakSession, KeycloakSessionFactory};

/// Error type for SPI operations.
#[derive(Debug, Error)]
pub enum SpiError {
    /// Provider not found.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider initialization failed.
    #[error("provider initialization failed: {0}")]
    InitializationFailed(String),

    /// Provider creation failed.
    #[error("provider creation failed: {0}")]
    CreationFailed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Base trait for all providers.
///
/// A provider is the per-session instance of a capability (single-use
/// objects, cluster coordination, ...). It lives as long as the session that
/// created it.
pub trait Provider: Send + Sync + Any {
    /// Called when the provider is being closed.
    ///
    /// Use this to clean up any resources held by the provider.
    fn close(&self) {}
}

/// Metadata about a provider.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    /// Unique identifier for this provider.
    pub id: &'static str,

    /// Human-readable name.
    pub name: &'static str,

    /// Description of what this provider does.
    pub description: &'static str,

    /// Priority for ordering (higher = preferred).
    pub priority: i32,
}

/// Factory for creating provider instances.
///
/// Factories are process-wide singletons owned by the
/// [`KeycloakSessionFactory`]; they create one provider per session.
///
/// ## Lifecycle
///
/// 1. `init()` - Called once at startup with the factory's config scope
/// 2. `post_init()` - Called after all factories are initialized
/// 3. `create()` - Called for each session to create a provider instance
/// 4. `close()` - Called at shutdown
pub trait ProviderFactory: Send + Sync + Debug + 'static {
    /// Provider type created by this factory.
    type Provider: Provider;

    /// Returns the unique identifier for this factory.
    fn id(&self) -> &'static str;

    /// Returns metadata about providers created by this factory.
    fn metadata(&self) -> ProviderMetadata;

    /// Returns the priority for ordering (higher = preferred).
    fn order(&self) -> i32 {
        0
    }

    /// Initializes the factory with configuration.
    ///
    /// ## Errors
    ///
    /// Returns an error if initialization fails.
    fn init(&self, _config: &dyn FactoryConfig) -> Result<(), SpiError> {
        Ok(())
    }

    /// Called after all factories have been initialized.
    ///
    /// Use this for cross-factory initialization that depends on other factories.
    ///
    /// ## Errors
    ///
    /// Returns an error if post-initialization fails.
    fn post_init(&self, _factory: &KeycloakSessionFactory) -> Result<(), SpiError> {
        Ok(())
    }

    /// Creates a new provider instance for the given session.
    ///
    /// ## Errors
    ///
    /// Returns an error if provider creation fails.
    fn create(&self, session: &KeycloakSession) -> Result<Self::Provider, SpiError>;

    /// Called when the factory is being shut down.
    fn close(&self) {}
}

/// Configuration interface for factory initialization.
pub trait FactoryConfig: Send + Sync {
    /// Gets a string configuration value.
    fn get(&self, key: &str) -> Option<&str>;

    /// Gets an integer configuration value.
    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Gets a boolean configuration value.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// Flat provider configuration keyed by `spi.provider.key`.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    values: HashMap<String, String>,
}

impl ProviderConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value for one provider of one SPI.
    #[must_use]
    pub fn set(
        mut self,
        spi: &str,
        provider: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Self {
        self.values
            .insert(format!("{spi}.{provider}.{key}"), value.into());
        self
    }

    /// Returns the configuration scope of one provider.
    #[must_use]
    pub fn scope<'a>(&'a self, spi: &str, provider: &str) -> ConfigScope<'a> {
        ConfigScope {
            prefix: format!("{spi}.{provider}."),
            values: &self.values,
        }
    }
}

/// View of the [`ProviderConfig`] entries of one provider.
#[derive(Debug)]
pub struct ConfigScope<'a> {
    prefix: String,
    values: &'a HashMap<String, String>,
}

impl FactoryConfig for ConfigScope<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&format!("{}{key}", self.prefix))
            .map(String::as_str)
    }
}

/// Definition of an SPI extension point.
///
/// An SPI defines a category of providers (e.g., "singleUseObject", "cluster").
pub trait Spi: Send + Sync {
    /// Returns the unique name of this SPI.
    fn name(&self) -> &'static str;

    /// Returns whether this SPI is internal (not meant for external extension).
    fn is_internal(&self) -> bool {
        false
    }
}
