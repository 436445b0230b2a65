//! Keycloak session management.
//!
//! [`KeycloakSessionFactory`] is the process-wide owner of all provider
//! factories; it is built once at startup and shared by reference.
//! [`KeycloakSession`] is the unit of work handed to providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::provider::{ProviderConfig, ProviderFactory, SpiError};
use crate::registry::SpiRegistry;
use crate::transaction::TransactionManager;

/// Process-wide session factory.
#[derive(Debug)]
pub struct KeycloakSessionFactory {
    registry: Arc<SpiRegistry>,
    closed: AtomicBool,
}

impl KeycloakSessionFactory {
    /// Initializes every registered factory and returns the session factory.
    ///
    /// All `init` hooks run first, then all `post_init` hooks.
    ///
    /// ## Errors
    ///
    /// Returns the first factory initialization error.
    pub fn initialize(
        registry: Arc<SpiRegistry>,
        config: &ProviderConfig,
    ) -> Result<Arc<Self>, SpiError> {
        let entries = registry.entries();

        for (spi, entry) in &entries {
            let scope = config.scope(spi, entry.id);
            entry.lifecycle.init(&scope).map_err(|e| {
                SpiError::InitializationFailed(format!("{spi}:{}: {e}", entry.id))
            })?;
            tracing::debug!("Initialized provider factory {}:{}", spi, entry.id);
        }

        let factory = Arc::new(Self {
            registry,
            closed: AtomicBool::new(false),
        });

        for (spi, entry) in &entries {
            entry.lifecycle.post_init(&factory).map_err(|e| {
                SpiError::InitializationFailed(format!("{spi}:{}: {e}", entry.id))
            })?;
        }

        tracing::info!("Session factory initialized with {} providers", entries.len());
        Ok(factory)
    }

    /// Creates a new request-scoped session.
    #[must_use]
    pub fn create(self: &Arc<Self>) -> KeycloakSession {
        KeycloakSession::new(Arc::clone(self))
    }

    /// Returns the SPI registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SpiRegistry> {
        &self.registry
    }

    /// Looks up a provider factory by SPI and provider ID.
    #[must_use]
    pub fn provider_factory<F: ProviderFactory>(&self, spi: &str, id: &str) -> Option<Arc<F>> {
        self.registry.provider_factory(spi, id)
    }

    /// Looks up the default provider factory of an SPI.
    #[must_use]
    pub fn default_provider_factory<F: ProviderFactory>(&self, spi: &str) -> Option<Arc<F>> {
        self.registry.default_factory(spi)
    }

    /// Closes every registered factory. Subsequent calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (spi, entry) in self.registry.entries() {
            entry.lifecycle.close();
            tracing::debug!("Closed provider factory {}:{}", spi, entry.id);
        }
    }
}

/// A Keycloak session represents a unit of work.
///
/// Sessions provide access to providers and own the transaction manager that
/// cache stores enlist in. Each request typically gets its own session.
#[derive(Debug)]
pub struct KeycloakSession {
    /// Unique session identifier.
    id: Uuid,

    /// Owning session factory.
    factory: Arc<KeycloakSessionFactory>,

    /// Transactions enlisted by providers of this session.
    transaction: TransactionManager,

    /// Session attributes.
    attributes: RwLock<HashMap<String, String>>,

    /// Whether this session has been closed.
    closed: RwLock<bool>,
}

impl KeycloakSession {
    fn new(factory: Arc<KeycloakSessionFactory>) -> Self {
        Self {
            id: Uuid::now_v7(),
            factory,
            transaction: TransactionManager::new(),
            attributes: RwLock::new(HashMap::new()),
            closed: RwLock::new(false),
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the session factory.
    #[must_use]
    pub const fn factory(&self) -> &Arc<KeycloakSessionFactory> {
        &self.factory
    }

    /// Returns the transaction manager of this unit of work.
    #[must_use]
    pub const fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction
    }

    /// Creates a provider from the default factory of an SPI.
    ///
    /// ## Errors
    ///
    /// Returns an error if no factory of type `F` is registered for the SPI
    /// or if the factory fails to create the provider.
    pub fn provider<F: ProviderFactory>(&self, spi: &str) -> Result<F::Provider, SpiError> {
        let factory = self
            .factory
            .default_provider_factory::<F>(spi)
            .ok_or_else(|| SpiError::ProviderNotFound(spi.to_string()))?;
        factory.create(self)
    }

    /// Sets a session attribute.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.write().insert(key.into(), value.into());
    }

    /// Gets a session attribute.
    #[must_use]
    pub fn get_attribute(&self, key: &str) -> Option<String> {
        self.attributes.read().get(key).cloned()
    }

    /// Removes a session attribute.
    pub fn remove_attribute(&self, key: &str) -> Option<String> {
        self.attributes.write().remove(key)
    }

    /// Returns whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Closes the session.
    ///
    /// After closing, the session should not be used.
    pub fn close(&self) {
        *self.closed.write() = true;
    }
}

impl Drop for KeycloakSession {
    fn drop(&mut self) {
        if self.transaction.is_active() && self.transaction.has_enlisted() {
            tracing::warn!("Session {} dropped with an uncommitted transaction", self.id);
        }
        if !*self.closed.read() {
            self.close();
        }
    }
}
