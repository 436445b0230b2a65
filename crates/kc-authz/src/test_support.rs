//! Fixtures shared by the evaluation tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::{Policy, Resource, ResourceServer, Scope, policy_types};
use crate::policy::{PolicyEvaluation, PolicyProvider};
use crate::provider::{AuthorizationProvider, PolicyProviderRegistry};
use crate::store::AuthorizationStore;
use crate::{EvaluationResult, StoreFactory};

/// Resource server ID used by the fixtures.
pub const SERVER: &str = "reports";

/// Grants and counts its invocations.
#[derive(Debug, Clone, Default)]
pub struct CountingProvider {
    pub calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PolicyProvider for CountingProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        evaluation.grant();
        Ok(())
    }
}

/// Panics when evaluated.
#[derive(Debug, Clone, Copy)]
pub struct PanickingProvider;

impl PolicyProvider for PanickingProvider {
    fn evaluate(&self, _evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        panic!("policy script crashed");
    }
}

/// Tries to write to the store while evaluating.
#[derive(Debug, Clone, Copy)]
pub struct WritingProvider;

impl PolicyProvider for WritingProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        evaluation
            .authorization()
            .store()
            .scopes()
            .create(Scope::new(SERVER, "sneaky"))?;
        evaluation.grant();
        Ok(())
    }
}

/// Store with one resource server, `read`/`write` scopes and a `Doc`
/// resource supporting both.
pub struct Fixture {
    pub data: Arc<AuthorizationStore>,
    pub server: Arc<ResourceServer>,
    pub doc: Arc<Resource>,
    pub registry: PolicyProviderRegistry,
}

impl Fixture {
    pub fn new(server: ResourceServer) -> Self {
        let data = Arc::new(AuthorizationStore::new());
        let store = StoreFactory::new(Arc::clone(&data));
        let server = store.resource_servers().create(server).unwrap();
        for scope in ["read", "write"] {
            store.scopes().create(Scope::new(SERVER, scope)).unwrap();
        }
        let doc = store
            .resources()
            .create(Resource::new(SERVER, "Doc").with_scopes(["read", "write"]))
            .unwrap();
        Self {
            data,
            server,
            doc,
            registry: PolicyProviderRegistry::with_builtins(),
        }
    }

    pub fn enforcing() -> Self {
        Self::new(ResourceServer::new(SERVER))
    }

    pub fn store(&self) -> StoreFactory {
        StoreFactory::new(Arc::clone(&self.data))
    }

    pub fn add_policy(&self, policy: Policy) -> Arc<Policy> {
        self.store().policies().create(policy).unwrap()
    }

    pub fn add_resource(&self, resource: Resource) -> Arc<Resource> {
        self.store().resources().create(resource).unwrap()
    }

    /// Adds a role policy and a resource permission on `Doc` using it.
    pub fn protect_doc_with_role(&self, role: &str) -> Arc<Policy> {
        let role_policy = self.add_policy(
            Policy::new(SERVER, format!("has {role}"), policy_types::ROLE).with_config("roles", role),
        );
        self.add_policy(
            Policy::new(SERVER, "doc permission", policy_types::RESOURCE)
                .with_resources([self.doc.id.clone()])
                .with_policies([role_policy.id.clone()]),
        )
    }

    pub fn provider(&self) -> AuthorizationProvider {
        AuthorizationProvider::new(Arc::clone(&self.data), Arc::new(self.registry.clone()))
    }
}
