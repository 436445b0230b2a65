//! Authorization model: resource servers, resources, scopes and policies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a resource server enforces its policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyEnforcementMode {
    /// Requests are denied unless a policy grants them.
    #[default]
    Enforcing,
    /// Requests without any applicable policy are granted.
    Permissive,
    /// Every request is granted.
    Disabled,
}

/// How the outcomes of several policies are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStrategy {
    /// All outcomes must be positive.
    #[default]
    Unanimous,
    /// At least one outcome must be positive.
    Affirmative,
    /// Positive outcomes must outnumber negative ones.
    Consensus,
}

/// Whether a policy's outcome is used as is or inverted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Logic {
    /// Use the outcome as is.
    #[default]
    Positive,
    /// Invert the outcome.
    Negative,
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    /// Access is permitted.
    Permit,
    /// Access is denied.
    Deny,
}

impl Effect {
    /// Returns whether this is [`Effect::Permit`].
    #[must_use]
    pub const fn is_permit(self) -> bool {
        matches!(self, Self::Permit)
    }
}

/// A client acting as a resource server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServer {
    /// Identifier, equal to the client ID owning the server.
    pub id: String,
    /// Enforcement mode.
    pub policy_enforcement_mode: PolicyEnforcementMode,
    /// Strategy combining permission policies.
    pub decision_strategy: DecisionStrategy,
}

impl ResourceServer {
    /// Creates an enforcing, unanimous resource server.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy_enforcement_mode: PolicyEnforcementMode::default(),
            decision_strategy: DecisionStrategy::default(),
        }
    }

    /// Sets the enforcement mode.
    #[must_use]
    pub const fn with_enforcement_mode(mut self, mode: PolicyEnforcementMode) -> Self {
        self.policy_enforcement_mode = mode;
        self
    }

    /// Sets the decision strategy.
    #[must_use]
    pub const fn with_decision_strategy(mut self, strategy: DecisionStrategy) -> Self {
        self.decision_strategy = strategy;
        self
    }
}

/// A named scope of a resource server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Unique identifier.
    pub id: String,
    /// Scope name, unique within the resource server.
    pub name: String,
    /// Owning resource server.
    pub resource_server_id: String,
}

impl Scope {
    /// Creates a scope.
    #[must_use]
    pub fn new(resource_server_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            resource_server_id: resource_server_id.into(),
        }
    }
}

/// A protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier.
    pub id: String,
    /// Resource name, unique per owner within the resource server.
    pub name: String,
    /// Optional resource type shared by similar resources.
    pub resource_type: Option<String>,
    /// Owner: the resource server ID or a user ID.
    pub owner: String,
    /// Owning resource server.
    pub resource_server_id: String,
    /// Names of the scopes the resource supports.
    pub scopes: Vec<String>,
}

impl Resource {
    /// Creates a resource owned by its resource server.
    #[must_use]
    pub fn new(resource_server_id: impl Into<String>, name: impl Into<String>) -> Self {
        let resource_server_id = resource_server_id.into();
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            resource_type: None,
            owner: resource_server_id.clone(),
            resource_server_id,
            scopes: Vec::new(),
        }
    }

    /// Sets the resource type.
    #[must_use]
    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Adds supported scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Returns whether the resource server itself owns the resource.
    #[must_use]
    pub fn is_owned_by_server(&self) -> bool {
        self.owner == self.resource_server_id
    }
}

/// Well-known policy types.
pub mod policy_types {
    /// Permission granting access to whole resources.
    pub const RESOURCE: &str = "resource";
    /// Permission granting access to scopes.
    pub const SCOPE: &str = "scope";
    /// Combines other policies.
    pub const AGGREGATE: &str = "aggregate";
    /// Grants identities holding roles.
    pub const ROLE: &str = "role";
    /// Grants listed users.
    pub const USER: &str = "user";
    /// Grants requests from listed clients.
    pub const CLIENT: &str = "client";
    /// Grants requests within a time window.
    pub const TIME: &str = "time";
}

/// A policy or permission.
///
/// Permissions are policies of type [`policy_types::RESOURCE`] or
/// [`policy_types::SCOPE`]; they bind resources and scopes to the policies
/// listed in `associated_policies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique identifier.
    pub id: String,
    /// Policy name.
    pub name: String,
    /// Type selecting the policy provider.
    pub policy_type: String,
    /// Logic applied to the outcome.
    pub logic: Logic,
    /// Strategy combining associated policies.
    pub decision_strategy: DecisionStrategy,
    /// Owning resource server.
    pub resource_server_id: String,
    /// IDs of associated policies.
    pub associated_policies: Vec<String>,
    /// IDs of resources the permission applies to.
    pub resources: Vec<String>,
    /// Names of scopes the permission applies to.
    pub scopes: Vec<String>,
    /// Resource type the permission applies to.
    pub resource_type: Option<String>,
    /// Provider-specific settings.
    pub config: BTreeMap<String, String>,
}

impl Policy {
    /// Creates a positive, unanimous policy.
    #[must_use]
    pub fn new(
        resource_server_id: impl Into<String>,
        name: impl Into<String>,
        policy_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            policy_type: policy_type.into(),
            logic: Logic::default(),
            decision_strategy: DecisionStrategy::default(),
            resource_server_id: resource_server_id.into(),
            associated_policies: Vec::new(),
            resources: Vec::new(),
            scopes: Vec::new(),
            resource_type: None,
            config: BTreeMap::new(),
        }
    }

    /// Sets the logic.
    #[must_use]
    pub const fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }

    /// Sets the decision strategy.
    #[must_use]
    pub const fn with_decision_strategy(mut self, strategy: DecisionStrategy) -> Self {
        self.decision_strategy = strategy;
        self
    }

    /// Associates policies by ID.
    #[must_use]
    pub fn with_policies(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.associated_policies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Binds resources by ID.
    #[must_use]
    pub fn with_resources(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resources.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Binds scopes by name.
    #[must_use]
    pub fn with_scopes(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes.extend(names.into_iter().map(Into::into));
        self
    }

    /// Binds a resource type.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Sets a config entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Returns a config entry.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Returns a comma separated config entry as a list.
    #[must_use]
    pub fn config_list(&self, key: &str) -> Vec<&str> {
        self.config_value(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns whether this is a resource permission.
    #[must_use]
    pub fn is_resource_permission(&self) -> bool {
        self.policy_type == policy_types::RESOURCE
    }

    /// Returns whether this is a scope permission.
    #[must_use]
    pub fn is_scope_permission(&self) -> bool {
        self.policy_type == policy_types::SCOPE
    }
}
