//! SPI Registry for managing provider factories.
//!
//! The registry is populated explicitly at process start: each factory is
//! registered under the name of its SPI and looked up again by its concrete
//! type, so wiring mistakes show up as `None` at startup instead of failing
//! inside a request.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::provider::{FactoryConfig, ProviderFactory, ProviderMetadata, Spi, SpiError};
use crate::session::KeycloakSessionFactory;

/// Lifecycle operations shared by every registered factory, independent of
/// the provider type it creates.
pub(crate) trait FactoryLifecycle: Send + Sync + Debug {
    fn init(&self, config: &dyn FactoryConfig) -> Result<(), SpiError>;
    fn post_init(&self, factory: &KeycloakSessionFactory) -> Result<(), SpiError>;
    fn close(&self);
}

impl<F: ProviderFactory> FactoryLifecycle for F {
    fn init(&self, config: &dyn FactoryConfig) -> Result<(), SpiError> {
        ProviderFactory::init(self, config)
    }

    fn post_init(&self, factory: &KeycloakSessionFactory) -> Result<(), SpiError> {
        ProviderFactory::post_init(self, factory)
    }

    fn close(&self) {
        ProviderFactory::close(self);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FactoryEntry {
    pub(crate) id: &'static str,
    pub(crate) metadata: ProviderMetadata,
    pub(crate) order: i32,
    pub(crate) lifecycle: Arc<dyn FactoryLifecycle>,
    factory: Arc<dyn Any + Send + Sync>,
}

/// Registry for SPI provider factories.
#[derive(Debug, Default)]
pub struct SpiRegistry {
    /// Map of SPI name to registered factories.
    factories: DashMap<&'static str, Vec<FactoryEntry>>,

    /// Default provider ID per SPI.
    defaults: RwLock<HashMap<&'static str, &'static str>>,
}

impl SpiRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider factory.
    ///
    /// Registering a second factory with the same id for the same SPI
    /// replaces the first one.
    pub fn register<F: ProviderFactory>(&self, spi: &dyn Spi, factory: F) {
        let factory = Arc::new(factory);
        let entry = FactoryEntry {
            id: factory.id(),
            metadata: factory.metadata(),
            order: factory.order(),
            lifecycle: Arc::clone(&factory) as Arc<dyn FactoryLifecycle>,
            factory: factory as Arc<dyn Any + Send + Sync>,
        };

        let mut entries = self.factories.entry(spi.name()).or_default();
        entries.retain(|e| e.id != entry.id);
        entries.push(entry);
        entries.sort_by(|a, b| b.order.cmp(&a.order));
    }

    /// Sets the default provider for an SPI.
    pub fn set_default(&self, spi_name: &'static str, provider_id: &'static str) {
        self.defaults.write().insert(spi_name, provider_id);
    }

    /// Gets the default provider ID for an SPI.
    ///
    /// Falls back to the registered factory with the highest order.
    #[must_use]
    pub fn get_default(&self, spi_name: &str) -> Option<&'static str> {
        self.defaults.read().get(spi_name).copied().or_else(|| {
            self.factories
                .get(spi_name)
                .and_then(|entries| entries.first().map(|e| e.id))
        })
    }

    /// Looks up a factory by SPI, provider ID and concrete type.
    #[must_use]
    pub fn provider_factory<F: ProviderFactory>(
        &self,
        spi_name: &str,
        provider_id: &str,
    ) -> Option<Arc<F>> {
        let factory = self.factories.get(spi_name).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.id == provider_id)
                .map(|e| Arc::clone(&e.factory))
        })?;
        factory.downcast::<F>().ok()
    }

    /// Looks up the default factory of an SPI.
    #[must_use]
    pub fn default_factory<F: ProviderFactory>(&self, spi_name: &str) -> Option<Arc<F>> {
        let provider_id = self.get_default(spi_name)?;
        self.provider_factory(spi_name, provider_id)
    }

    /// Lists all registered provider IDs for an SPI.
    #[must_use]
    pub fn list_providers(&self, spi_name: &str) -> Vec<&'static str> {
        self.factories
            .get(spi_name)
            .map(|entries| entries.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    /// Gets provider metadata by SPI and provider ID.
    #[must_use]
    pub fn get_metadata(&self, spi_name: &str, provider_id: &str) -> Option<ProviderMetadata> {
        self.factories.get(spi_name).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.id == provider_id)
                .map(|e| e.metadata.clone())
        })
    }

    /// Checks if a provider is registered.
    #[must_use]
    pub fn has_provider(&self, spi_name: &str, provider_id: &str) -> bool {
        self.factories
            .get(spi_name)
            .is_some_and(|entries| entries.iter().any(|e| e.id == provider_id))
    }

    /// Returns the number of registered providers for an SPI.
    #[must_use]
    pub fn provider_count(&self, spi_name: &str) -> usize {
        self.factories
            .get(spi_name)
            .map_or(0, |entries| entries.len())
    }

    /// Validates that required providers are registered.
    ///
    /// ## Errors
    ///
    /// Returns an error if a required provider is missing.
    pub fn validate_required(&self, requirements: &[(&str, &str)]) -> Result<(), SpiError> {
        for (spi_name, provider_id) in requirements {
            if !self.has_provider(spi_name, provider_id) {
                return Err(SpiError::ProviderNotFound(format!(
                    "{spi_name}:{provider_id}"
                )));
            }
        }
        Ok(())
    }

    /// Snapshot of every registered factory as `(spi, entry)` pairs.
    pub(crate) fn entries(&self) -> Vec<(&'static str, FactoryEntry)> {
        self.factories
            .iter()
            .flat_map(|item| {
                let spi = *item.key();
                item.value()
                    .iter()
                    .cloned()
                    .map(move |entry| (spi, entry))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
