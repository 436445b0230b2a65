//! Authorization provider and its factory.

use std::collections::HashMap;
use std::sync::Arc;

use kc_core::event::EventListener;
use kc_spi::{KeycloakSession, Provider, ProviderFactory, ProviderMetadata, Spi, SpiError};

use crate::context::EvaluationContext;
use crate::error::{EvaluationError, EvaluationResult};
use crate::evaluator::PolicyEvaluator;
use crate::model::{ResourceServer, policy_types};
use crate::permission_evaluator::PermissionEvaluator;
use crate::permissions::AuthorizationRequest;
use crate::policy::PolicyProvider;
use crate::providers::{
    AggregatePolicyProvider, ClientPolicyProvider, PermissionPolicyProvider, RolePolicyProvider,
    TimePolicyProvider, UserPolicyProvider,
};
use crate::store::{AuthorizationStore, StoreFactory};

/// Name of the authorization SPI.
pub const AUTHORIZATION_SPI: &str = "authorization";

/// The authorization SPI.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationSpi;

impl Spi for AuthorizationSpi {
    fn name(&self) -> &'static str {
        AUTHORIZATION_SPI
    }
}

/// Policy providers by policy type.
#[derive(Debug, Clone, Default)]
pub struct PolicyProviderRegistry {
    providers: HashMap<String, Arc<dyn PolicyProvider>>,
}

impl PolicyProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in providers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(policy_types::RESOURCE, PermissionPolicyProvider);
        registry.register(policy_types::SCOPE, PermissionPolicyProvider);
        registry.register(policy_types::AGGREGATE, AggregatePolicyProvider);
        registry.register(policy_types::ROLE, RolePolicyProvider);
        registry.register(policy_types::USER, UserPolicyProvider);
        registry.register(policy_types::CLIENT, ClientPolicyProvider);
        registry.register(policy_types::TIME, TimePolicyProvider);
        registry
    }

    /// Registers `provider` for `policy_type`, replacing any previous one.
    pub fn register(&mut self, policy_type: impl Into<String>, provider: impl PolicyProvider + 'static) {
        self.providers.insert(policy_type.into(), Arc::new(provider));
    }

    /// Returns the provider for `policy_type`.
    #[must_use]
    pub fn get(&self, policy_type: &str) -> Option<Arc<dyn PolicyProvider>> {
        self.providers.get(policy_type).cloned()
    }

    /// Returns the registered policy types.
    #[must_use]
    pub fn policy_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.providers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Per-session entry point to authorization services.
pub struct AuthorizationProvider {
    store: StoreFactory,
    policy_providers: Arc<PolicyProviderRegistry>,
    event_listener: Option<Arc<dyn EventListener>>,
}

impl std::fmt::Debug for AuthorizationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationProvider")
            .field("store", &self.store)
            .field("policy_types", &self.policy_providers.policy_types())
            .finish_non_exhaustive()
    }
}

impl Provider for AuthorizationProvider {}

impl AuthorizationProvider {
    /// Creates a provider over `data` using `policy_providers`.
    #[must_use]
    pub fn new(data: Arc<AuthorizationStore>, policy_providers: Arc<PolicyProviderRegistry>) -> Self {
        Self {
            store: StoreFactory::new(data),
            policy_providers,
            event_listener: None,
        }
    }

    /// Emits a `PERMISSION_EVALUATED` event per evaluation to `listener`.
    #[must_use]
    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = Some(listener);
        self
    }

    /// Returns this session's store view.
    #[must_use]
    pub const fn store(&self) -> &StoreFactory {
        &self.store
    }

    /// Returns the provider for `policy_type`.
    ///
    /// ## Errors
    ///
    /// Returns [`EvaluationError::UnknownPolicyType`] if none is registered.
    pub fn policy_provider(&self, policy_type: &str) -> EvaluationResult<Arc<dyn PolicyProvider>> {
        self.policy_providers
            .get(policy_type)
            .ok_or_else(|| EvaluationError::UnknownPolicyType(policy_type.to_string()))
    }

    /// Returns the policy evaluator.
    #[must_use]
    pub const fn policy_evaluator(&self) -> PolicyEvaluator {
        PolicyEvaluator
    }

    /// Creates an evaluator for `request` against `resource_server`.
    #[must_use]
    pub fn evaluator<'a>(
        &'a self,
        resource_server: Arc<ResourceServer>,
        context: &'a EvaluationContext,
        request: AuthorizationRequest,
    ) -> PermissionEvaluator<'a> {
        PermissionEvaluator::new(self, resource_server, context, request)
    }

    pub(crate) fn event_listener(&self) -> Option<&Arc<dyn EventListener>> {
        self.event_listener.as_ref()
    }
}

/// Factory of [`AuthorizationProvider`]s sharing one store.
pub struct AuthorizationProviderFactory {
    data: Arc<AuthorizationStore>,
    policy_providers: Arc<PolicyProviderRegistry>,
    event_listener: Option<Arc<dyn EventListener>>,
}

impl std::fmt::Debug for AuthorizationProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationProviderFactory")
            .field("policy_types", &self.policy_providers.policy_types())
            .finish_non_exhaustive()
    }
}

impl AuthorizationProviderFactory {
    /// Provider ID.
    pub const ID: &'static str = "default";

    /// Creates a factory over `data` with the built-in policy providers.
    #[must_use]
    pub fn new(data: Arc<AuthorizationStore>) -> Self {
        Self {
            data,
            policy_providers: Arc::new(PolicyProviderRegistry::with_builtins()),
            event_listener: None,
        }
    }

    /// Replaces the policy providers.
    #[must_use]
    pub fn with_policy_providers(mut self, registry: PolicyProviderRegistry) -> Self {
        self.policy_providers = Arc::new(registry);
        self
    }

    /// Sends evaluation events to `listener`.
    #[must_use]
    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = Some(listener);
        self
    }

    /// Returns the shared store.
    #[must_use]
    pub const fn data(&self) -> &Arc<AuthorizationStore> {
        &self.data
    }
}

impl ProviderFactory for AuthorizationProviderFactory {
    type Provider = AuthorizationProvider;

    fn id(&self) -> &'static str {
        Self::ID
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: Self::ID,
            name: "Authorization",
            description: "Policy evaluation over the in-memory authorization store",
            priority: 0,
        }
    }

    fn create(&self, _session: &KeycloakSession) -> Result<AuthorizationProvider, SpiError> {
        let provider =
            AuthorizationProvider::new(Arc::clone(&self.data), Arc::clone(&self.policy_providers));
        Ok(match &self.event_listener {
            Some(listener) => provider.with_event_listener(Arc::clone(listener)),
            None => provider,
        })
    }
}
