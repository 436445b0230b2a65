//! Permission requests and their expansion into resource permissions.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EvaluationError, EvaluationResult};
use crate::model::{Resource, ResourceServer};
use crate::store::StoreFactory;

/// One requested permission: a resource, scopes, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Resource ID or name.
    pub resource: Option<String>,
    /// Requested scope names; empty means every scope of the resource.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl PermissionRequest {
    /// Requests a resource with all its scopes.
    #[must_use]
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            scopes: Vec::new(),
        }
    }

    /// Requests scopes without a resource.
    #[must_use]
    pub fn scopes(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            resource: None,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Narrows the request to `scopes`.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }
}

/// An authorization request. Without permissions, every resource of the
/// resource server is evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Requested permissions.
    #[serde(default)]
    pub permissions: Vec<PermissionRequest>,
}

impl AuthorizationRequest {
    /// Requests every resource.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a permission.
    #[must_use]
    pub fn with_permission(mut self, permission: PermissionRequest) -> Self {
        self.permissions.push(permission);
        self
    }
}

/// A resource and scopes to decide on.
#[derive(Debug, Clone)]
pub struct ResourcePermission {
    resource_server: Arc<ResourceServer>,
    resource: Option<Arc<Resource>>,
    scopes: Vec<String>,
    granted: bool,
}

impl ResourcePermission {
    /// Creates a permission.
    #[must_use]
    pub fn new(
        resource_server: Arc<ResourceServer>,
        resource: Option<Arc<Resource>>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            resource_server,
            resource,
            scopes,
            granted: false,
        }
    }

    /// Marks the permission as granted up front, skipping policies.
    #[must_use]
    pub const fn granted(mut self) -> Self {
        self.granted = true;
        self
    }

    /// Returns whether the permission is granted up front.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        self.granted
    }

    /// Returns the resource server.
    #[must_use]
    pub const fn resource_server(&self) -> &Arc<ResourceServer> {
        &self.resource_server
    }

    /// Returns the resource, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_deref()
    }

    /// Returns the requested scope names.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Key identifying this permission within one evaluation.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.resource {
            Some(resource) => resource.id.clone(),
            None => format!("scopes:{}", self.scopes.join(",")),
        }
    }
}

/// A granted permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Granted resource ID.
    pub resource_id: Option<String>,
    /// Granted resource name.
    pub resource_name: Option<String>,
    /// Granted scope names.
    pub scopes: BTreeSet<String>,
}

impl Permission {
    pub(crate) fn new(resource: Option<&Resource>, scopes: impl IntoIterator<Item = String>) -> Self {
        Self {
            resource_id: resource.map(|r| r.id.clone()),
            resource_name: resource.map(|r| r.name.clone()),
            scopes: scopes.into_iter().collect(),
        }
    }
}

/// Expands `request` into the resource permissions to evaluate.
///
/// ## Errors
///
/// Returns [`EvaluationError::InvalidRequest`] if a requested resource or
/// scope does not exist.
pub fn all(
    store: &StoreFactory,
    resource_server: &Arc<ResourceServer>,
    request: &AuthorizationRequest,
) -> EvaluationResult<Vec<ResourcePermission>> {
    if request.permissions.is_empty() {
        return Ok(store
            .resources()
            .find_by_resource_server(&resource_server.id)
            .into_iter()
            .map(|resource| {
                let scopes = resource.scopes.clone();
                ResourcePermission::new(Arc::clone(resource_server), Some(resource), scopes)
            })
            .collect());
    }

    let mut permissions = Vec::with_capacity(request.permissions.len());
    for requested in &request.permissions {
        for scope in &requested.scopes {
            if store.scopes().find_by_name(&resource_server.id, scope).is_none() {
                return Err(EvaluationError::InvalidRequest(format!("unknown scope {scope}")));
            }
        }

        let Some(reference) = &requested.resource else {
            if requested.scopes.is_empty() {
                return Err(EvaluationError::InvalidRequest(
                    "permission without resource or scopes".to_string(),
                ));
            }
            permissions.push(ResourcePermission::new(
                Arc::clone(resource_server),
                None,
                requested.scopes.clone(),
            ));
            continue;
        };

        let resource = resolve_resource(store, resource_server, reference)
            .ok_or_else(|| EvaluationError::InvalidRequest(format!("unknown resource {reference}")))?;
        let scopes = if requested.scopes.is_empty() {
            resource.scopes.clone()
        } else if resource.scopes.is_empty() {
            requested.scopes.clone()
        } else {
            requested
                .scopes
                .iter()
                .filter(|scope| resource.scopes.contains(scope))
                .cloned()
                .collect()
        };
        permissions.push(ResourcePermission::new(
            Arc::clone(resource_server),
            Some(resource),
            scopes,
        ));
    }
    Ok(permissions)
}

fn resolve_resource(
    store: &StoreFactory,
    resource_server: &ResourceServer,
    reference: &str,
) -> Option<Arc<Resource>> {
    store
        .resources()
        .find_by_id(reference)
        .filter(|r| r.resource_server_id == resource_server.id)
        .or_else(|| {
            store
                .resources()
                .find_by_name(&resource_server.id, reference, &resource_server.id)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scope;
    use crate::store::AuthorizationStore;

    fn setup() -> (StoreFactory, Arc<ResourceServer>) {
        let store = StoreFactory::new(Arc::new(AuthorizationStore::new()));
        let server = store.resource_servers().create(ResourceServer::new("app")).unwrap();
        for scope in ["read", "write", "delete"] {
            store.scopes().create(Scope::new("app", scope)).unwrap();
        }
        store
            .resources()
            .create(Resource::new("app", "Doc").with_scopes(["read", "write"]))
            .unwrap();
        store.resources().create(Resource::new("app", "Report")).unwrap();
        (store, server)
    }

    #[test]
    fn empty_request_covers_every_resource() {
        let (store, server) = setup();

        let permissions = all(&store, &server, &AuthorizationRequest::all()).unwrap();

        let names: BTreeSet<_> = permissions
            .iter()
            .filter_map(|p| p.resource().map(|r| r.name.clone()))
            .collect();
        assert_eq!(names, BTreeSet::from(["Doc".to_string(), "Report".to_string()]));
    }

    #[test]
    fn requested_scopes_are_narrowed_to_resource_scopes() {
        let (store, server) = setup();
        let request = AuthorizationRequest::all()
            .with_permission(PermissionRequest::resource("Doc").with_scopes(["write", "delete"]));

        let permissions = all(&store, &server, &request).unwrap();

        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].scopes(), ["write".to_string()]);
    }

    #[test]
    fn scope_only_request_has_no_resource() {
        let (store, server) = setup();
        let request =
            AuthorizationRequest::all().with_permission(PermissionRequest::scopes(["delete"]));

        let permissions = all(&store, &server, &request).unwrap();

        assert!(permissions[0].resource().is_none());
        assert_eq!(permissions[0].key(), "scopes:delete");
    }

    #[test]
    fn unknown_resource_or_scope_is_rejected() {
        let (store, server) = setup();

        let missing = AuthorizationRequest::all().with_permission(PermissionRequest::resource("Nope"));
        let bad_scope =
            AuthorizationRequest::all().with_permission(PermissionRequest::scopes(["fly"]));

        assert!(matches!(
            all(&store, &server, &missing),
            Err(EvaluationError::InvalidRequest(_))
        ));
        assert!(matches!(
            all(&store, &server, &bad_scope),
            Err(EvaluationError::InvalidRequest(_))
        ));
    }
}
