//! Authorization stores.
//!
//! [`AuthorizationStore`] holds the data shared by every request.
//! [`StoreFactory`] is a per-request view over it that carries its own
//! read-only flag: permission evaluation switches the view to read-only for
//! its duration through a [`ReadOnlyGuard`], and every write attempted in
//! that window fails with [`StoreError::ReadOnly`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use crate::model::{Policy, Resource, ResourceServer, Scope};

/// Errors raised by the authorization stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write was attempted while the store is read-only.
    #[error("authorization store is read-only")]
    ReadOnly,

    /// The referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind.
        kind: &'static str,
        /// Requested ID or name.
        id: String,
    },

    /// An entity with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    Duplicate {
        /// Entity kind.
        kind: &'static str,
        /// Conflicting ID or name.
        id: String,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Authorization data shared across requests.
#[derive(Debug, Default)]
pub struct AuthorizationStore {
    resource_servers: DashMap<String, Arc<ResourceServer>>,
    resources: DashMap<String, Arc<Resource>>,
    scopes: DashMap<String, Arc<Scope>>,
    policies: DashMap<String, Arc<Policy>>,
}

impl AuthorizationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per-request view over an [`AuthorizationStore`].
#[derive(Debug)]
pub struct StoreFactory {
    data: Arc<AuthorizationStore>,
    read_only: AtomicBool,
}

impl StoreFactory {
    /// Creates a writable view over `data`.
    #[must_use]
    pub fn new(data: Arc<AuthorizationStore>) -> Self {
        Self {
            data,
            read_only: AtomicBool::new(false),
        }
    }

    /// Returns whether writes are currently rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Switches the view to read-only until the returned guard drops.
    ///
    /// The guard restores the mode in effect before the call, so nested
    /// sections compose.
    #[must_use = "the store becomes writable again as soon as the guard drops"]
    pub fn enter_read_only(&self) -> ReadOnlyGuard<'_> {
        let previous = self.read_only.swap(true, Ordering::AcqRel);
        ReadOnlyGuard {
            flag: &self.read_only,
            previous,
        }
    }

    /// Returns the resource server store.
    #[must_use]
    pub const fn resource_servers(&self) -> ResourceServerStore<'_> {
        ResourceServerStore { factory: self }
    }

    /// Returns the resource store.
    #[must_use]
    pub const fn resources(&self) -> ResourceStore<'_> {
        ResourceStore { factory: self }
    }

    /// Returns the scope store.
    #[must_use]
    pub const fn scopes(&self) -> ScopeStore<'_> {
        ScopeStore { factory: self }
    }

    /// Returns the policy store.
    #[must_use]
    pub const fn policies(&self) -> PolicyStore<'_> {
        PolicyStore { factory: self }
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.is_read_only() {
            tracing::warn!("Rejected write to read-only authorization store");
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

/// Scoped read-only section of a [`StoreFactory`].
#[derive(Debug)]
pub struct ReadOnlyGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for ReadOnlyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

/// Access to resource servers.
#[derive(Debug, Clone, Copy)]
pub struct ResourceServerStore<'a> {
    factory: &'a StoreFactory,
}

impl ResourceServerStore<'_> {
    /// Stores a resource server.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only or the ID is taken.
    pub fn create(&self, server: ResourceServer) -> StoreResult<Arc<ResourceServer>> {
        self.factory.check_writable()?;
        insert_new(&self.factory.data.resource_servers, "resource server", server.id.clone(), server)
    }

    /// Looks up a resource server.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Arc<ResourceServer>> {
        self.factory
            .data
            .resource_servers
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Deletes a resource server with all its resources, scopes and
    /// policies.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.factory.check_writable()?;
        let data = &self.factory.data;
        data.resources.retain(|_, r| r.resource_server_id != id);
        data.scopes.retain(|_, s| s.resource_server_id != id);
        data.policies.retain(|_, p| p.resource_server_id != id);
        Ok(data.resource_servers.remove(id).is_some())
    }
}

/// Access to resources.
#[derive(Debug, Clone, Copy)]
pub struct ResourceStore<'a> {
    factory: &'a StoreFactory,
}

impl ResourceStore<'_> {
    /// Stores a resource.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only, the ID is taken or the owner already
    /// has a resource with the same name.
    pub fn create(&self, resource: Resource) -> StoreResult<Arc<Resource>> {
        self.factory.check_writable()?;
        let clash = self.factory.data.resources.iter().any(|r| {
            r.resource_server_id == resource.resource_server_id
                && r.owner == resource.owner
                && r.name == resource.name
        });
        if clash {
            return Err(StoreError::Duplicate {
                kind: "resource",
                id: resource.name,
            });
        }
        insert_new(&self.factory.data.resources, "resource", resource.id.clone(), resource)
    }

    /// Looks up a resource by ID.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Resource>> {
        self.factory
            .data
            .resources
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up a resource by name among those owned by `owner`.
    #[must_use]
    pub fn find_by_name(&self, server_id: &str, name: &str, owner: &str) -> Option<Arc<Resource>> {
        self.filter(|r| r.resource_server_id == server_id && r.name == name && r.owner == owner)
            .into_iter()
            .next()
    }

    /// Returns every resource of a resource server.
    #[must_use]
    pub fn find_by_resource_server(&self, server_id: &str) -> Vec<Arc<Resource>> {
        self.filter(|r| r.resource_server_id == server_id)
    }

    /// Returns the resources of a given type.
    #[must_use]
    pub fn find_by_type(&self, server_id: &str, resource_type: &str) -> Vec<Arc<Resource>> {
        self.filter(|r| {
            r.resource_server_id == server_id && r.resource_type.as_deref() == Some(resource_type)
        })
    }

    /// Deletes a resource.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.factory.check_writable()?;
        Ok(self.factory.data.resources.remove(id).is_some())
    }

    fn filter(&self, predicate: impl Fn(&Resource) -> bool) -> Vec<Arc<Resource>> {
        let mut found: Vec<_> = self
            .factory
            .data
            .resources
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

/// Access to scopes.
#[derive(Debug, Clone, Copy)]
pub struct ScopeStore<'a> {
    factory: &'a StoreFactory,
}

impl ScopeStore<'_> {
    /// Stores a scope.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only or the name is taken.
    pub fn create(&self, scope: Scope) -> StoreResult<Arc<Scope>> {
        self.factory.check_writable()?;
        if self.find_by_name(&scope.resource_server_id, &scope.name).is_some() {
            return Err(StoreError::Duplicate {
                kind: "scope",
                id: scope.name,
            });
        }
        insert_new(&self.factory.data.scopes, "scope", scope.id.clone(), scope)
    }

    /// Looks up a scope by name.
    #[must_use]
    pub fn find_by_name(&self, server_id: &str, name: &str) -> Option<Arc<Scope>> {
        self.factory
            .data
            .scopes
            .iter()
            .find(|s| s.resource_server_id == server_id && s.name == name)
            .map(|entry| Arc::clone(entry.value()))
    }
}

/// Access to policies and permissions.
#[derive(Debug, Clone, Copy)]
pub struct PolicyStore<'a> {
    factory: &'a StoreFactory,
}

impl PolicyStore<'_> {
    /// Stores a policy.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only or the ID is taken.
    pub fn create(&self, policy: Policy) -> StoreResult<Arc<Policy>> {
        self.factory.check_writable()?;
        insert_new(&self.factory.data.policies, "policy", policy.id.clone(), policy)
    }

    /// Looks up a policy by ID.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Policy>> {
        self.factory
            .data
            .policies
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the permissions bound to a resource.
    #[must_use]
    pub fn find_by_resource(&self, server_id: &str, resource_id: &str) -> Vec<Arc<Policy>> {
        self.filter(|p| {
            p.resource_server_id == server_id && p.resources.iter().any(|id| id == resource_id)
        })
    }

    /// Returns the permissions bound to a resource type.
    #[must_use]
    pub fn find_by_resource_type(&self, server_id: &str, resource_type: &str) -> Vec<Arc<Policy>> {
        self.filter(|p| {
            p.resource_server_id == server_id && p.resource_type.as_deref() == Some(resource_type)
        })
    }

    /// Returns the scope permissions covering any of `scopes`.
    ///
    /// With a resource, permissions bound to other resources are skipped;
    /// without one, only permissions not bound to any resource match.
    #[must_use]
    pub fn find_by_scopes(
        &self,
        server_id: &str,
        resource: Option<&Resource>,
        scopes: &[String],
    ) -> Vec<Arc<Policy>> {
        self.filter(|p| {
            p.resource_server_id == server_id
                && p.is_scope_permission()
                && p.scopes.iter().any(|s| scopes.contains(s))
                && match resource {
                    Some(resource) => {
                        p.resources.is_empty() || p.resources.iter().any(|id| *id == resource.id)
                    }
                    None => p.resources.is_empty(),
                }
        })
    }

    /// Deletes a policy and drops it from every policy associating it.
    ///
    /// ## Errors
    ///
    /// Fails if the store is read-only.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.factory.check_writable()?;
        let policies = &self.factory.data.policies;
        let removed = policies.remove(id).is_some();
        for mut entry in policies.iter_mut() {
            if entry.associated_policies.iter().any(|p| p == id) {
                Arc::make_mut(entry.value_mut())
                    .associated_policies
                    .retain(|p| p != id);
            }
        }
        Ok(removed)
    }

    fn filter(&self, predicate: impl Fn(&Policy) -> bool) -> Vec<Arc<Policy>> {
        let mut found: Vec<_> = self
            .factory
            .data
            .policies
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

fn insert_new<T>(
    map: &DashMap<String, Arc<T>>,
    kind: &'static str,
    id: String,
    value: T,
) -> StoreResult<Arc<T>> {
    match map.entry(id) {
        dashmap::mapref::entry::Entry::Occupied(entry) => Err(StoreError::Duplicate {
            kind,
            id: entry.key().clone(),
        }),
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            let value = Arc::new(value);
            entry.insert(Arc::clone(&value));
            Ok(value)
        }
    }
}
