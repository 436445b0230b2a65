//! # kc-authz
//!
//! Authorization services for Keycloak Rust.
//!
//! A resource server protects resources and scopes with permissions. A
//! permission binds resources, resource types or scopes to policies
//! (roles, users, clients, time windows, aggregates); evaluating an
//! [`AuthorizationRequest`] yields the [`Permission`]s granted to an
//! identity.
//!
//! ## Evaluation
//!
//! ```text
//! AuthorizationProvider::evaluator
//!   └─ PermissionEvaluator        store read-only, errors and panics → Decision::on_error
//!        └─ permissions::all      request → ResourcePermissions
//!             └─ PolicyEvaluator  permission policies → PolicyProviders → Decision
//! ```
//!
//! Associated policies are evaluated once per subject and pass thanks to
//! the [`DecisionCache`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod context;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod permission_evaluator;
pub mod permissions;
pub mod policy;
pub mod provider;
pub mod providers;
pub mod store;

#[cfg(test)]
mod test_support;

pub use context::{EvaluationContext, Identity};
pub use decision::{Decision, DecisionPermissionCollector, Evaluation};
pub use error::{EvaluationError, EvaluationResult};
pub use evaluator::PolicyEvaluator;
pub use model::{
    DecisionStrategy, Effect, Logic, Policy, PolicyEnforcementMode, Resource, ResourceServer,
    Scope, policy_types,
};
pub use permission_evaluator::{EvaluationState, PermissionEvaluator};
pub use permissions::{AuthorizationRequest, Permission, PermissionRequest, ResourcePermission};
pub use policy::{DecisionCache, PolicyEvaluation, PolicyProvider};
pub use provider::{
    AUTHORIZATION_SPI, AuthorizationProvider, AuthorizationProviderFactory, AuthorizationSpi,
    PolicyProviderRegistry,
};
pub use store::{AuthorizationStore, ReadOnlyGuard, StoreError, StoreFactory, StoreResult};
