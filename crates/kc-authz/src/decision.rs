//! Decisions: receivers of policy outcomes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{EvaluationError, EvaluationResult};
use crate::model::{DecisionStrategy, Effect, Policy};
use crate::permissions::{Permission, ResourcePermission};

/// An outcome reported to a [`Decision`].
///
/// With a `policy`, the effect is that policy's outcome; `parent_policy`
/// then names the permission it was evaluated for, or is `None` when the
/// policy is itself the permission. Without a `policy`, the effect is a
/// verdict on the whole permission, as given by a disabled or permissive
/// resource server.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    /// Permission being decided.
    pub permission: &'a ResourcePermission,
    /// Evaluated policy.
    pub policy: Option<&'a Arc<Policy>>,
    /// Permission the policy is associated with.
    pub parent_policy: Option<&'a Arc<Policy>>,
    /// Outcome.
    pub effect: Effect,
}

/// Receives the outcomes of a permission evaluation.
pub trait Decision {
    /// Called for each policy outcome.
    fn on_decision(&mut self, evaluation: &Evaluation<'_>);

    /// Called once all policies of a permission were evaluated.
    fn on_complete_permission(&mut self, _permission: &ResourcePermission) {}

    /// Called once every permission was evaluated.
    fn on_complete(&mut self) {}

    /// Called instead of [`Decision::on_complete`] when evaluation fails.
    fn on_error(&mut self, error: EvaluationError);
}

/// Applies `strategy` to policy effects.
///
/// `total` is the number of policies that should have produced an effect;
/// under [`DecisionStrategy::Consensus`] missing effects count as denials.
#[must_use]
pub fn is_granted(strategy: DecisionStrategy, effects: &[Effect], total: usize) -> bool {
    let grants = effects.iter().filter(|e| e.is_permit()).count();
    match strategy {
        DecisionStrategy::Unanimous => grants == effects.len(),
        DecisionStrategy::Affirmative => grants > 0,
        DecisionStrategy::Consensus => {
            let denies = total.max(effects.len()) - grants;
            grants > denies
        }
    }
}

#[derive(Debug)]
struct PolicyResult {
    policy: Arc<Policy>,
    associated: Vec<(Arc<Policy>, Effect)>,
}

impl PolicyResult {
    fn record(&mut self, policy: &Arc<Policy>, effect: Effect) {
        match self.associated.iter_mut().find(|(p, _)| p.id == policy.id) {
            Some(existing) => existing.1 = effect,
            None => self.associated.push((Arc::clone(policy), effect)),
        }
    }

    fn is_granted(&self) -> bool {
        let effects: Vec<Effect> = self.associated.iter().map(|(_, e)| *e).collect();
        let total = self.policy.associated_policies.len();
        is_granted(self.policy.decision_strategy, &effects, total)
    }
}

#[derive(Debug, Default)]
struct PermissionResult {
    policies: Vec<PolicyResult>,
}

impl PermissionResult {
    fn policy_mut(&mut self, policy: &Arc<Policy>) -> &mut PolicyResult {
        let index = match self.policies.iter().position(|r| r.policy.id == policy.id) {
            Some(index) => index,
            None => {
                self.policies.push(PolicyResult {
                    policy: Arc::clone(policy),
                    associated: Vec::new(),
                });
                self.policies.len() - 1
            }
        };
        &mut self.policies[index]
    }
}

/// Collects granted permissions.
///
/// The resource server's decision strategy combines the permission
/// policies of each permission. A denied permission may still be granted
/// the scopes of the scope permissions that passed, minus every scope a
/// failing policy denies.
#[derive(Debug, Default)]
pub struct DecisionPermissionCollector {
    results: HashMap<String, PermissionResult>,
    granted: Vec<Permission>,
    error: Option<EvaluationError>,
    completed: bool,
}

impl DecisionPermissionCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the permissions granted so far.
    #[must_use]
    pub fn results(&self) -> &[Permission] {
        &self.granted
    }

    /// Returns whether evaluation completed without error.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Returns the granted permissions.
    ///
    /// ## Errors
    ///
    /// Returns the error evaluation failed with.
    pub fn into_results(self) -> EvaluationResult<Vec<Permission>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.granted),
        }
    }

    fn grant(&mut self, permission: &ResourcePermission, scopes: impl IntoIterator<Item = String>) {
        let granted = Permission::new(permission.resource(), scopes);
        // resource-less grants share one entry holding every granted scope
        let existing = self
            .granted
            .iter_mut()
            .find(|p| p.resource_id == granted.resource_id);
        if let Some(existing) = existing {
            existing.scopes.extend(granted.scopes);
            return;
        }
        tracing::debug!("Granted permission {}", permission.key());
        self.granted.push(granted);
    }

    fn complete_denied(&mut self, permission: &ResourcePermission, result: &PermissionResult) {
        let requested = permission.scopes();
        let resource = permission.resource();
        let mut granted_scopes: BTreeSet<String> = BTreeSet::new();
        let mut denied_scopes: BTreeSet<String> = BTreeSet::new();
        let mut resource_granted = false;
        let mut any_deny = false;

        for policy_result in &result.policies {
            let policy = &policy_result.policy;
            if policy_result.is_granted() {
                if policy.is_scope_permission() {
                    granted_scopes.extend(
                        requested
                            .iter()
                            .filter(|scope| policy.scopes.contains(*scope))
                            .cloned(),
                    );
                } else if policy.is_resource_permission() {
                    granted_scopes.extend(requested.iter().cloned());
                }
                resource_granted |= resource.is_some_and(|r| policy.resources.contains(&r.id));
            } else {
                if policy.is_resource_permission() {
                    if !resource_granted {
                        denied_scopes.extend(requested.iter().cloned());
                    }
                } else {
                    denied_scopes.extend(policy.scopes.iter().cloned());
                }
                any_deny = true;
            }
        }

        granted_scopes.retain(|scope| !denied_scopes.contains(scope));

        if !resource_granted && granted_scopes.is_empty() && !requested.is_empty() {
            return;
        }
        if any_deny && granted_scopes.is_empty() {
            return;
        }
        self.grant(permission, granted_scopes);
    }
}

impl Decision for DecisionPermissionCollector {
    fn on_decision(&mut self, evaluation: &Evaluation<'_>) {
        let permission = evaluation.permission;
        let Some(policy) = evaluation.policy else {
            self.results.remove(&permission.key());
            if evaluation.effect.is_permit() {
                self.grant(permission, permission.scopes().iter().cloned());
            }
            return;
        };
        let permission_policy = evaluation.parent_policy.unwrap_or(policy);
        self.results
            .entry(permission.key())
            .or_default()
            .policy_mut(permission_policy)
            .record(policy, evaluation.effect);
    }

    fn on_complete_permission(&mut self, permission: &ResourcePermission) {
        let Some(result) = self.results.remove(&permission.key()) else {
            return;
        };
        let outcomes: Vec<Effect> = result
            .policies
            .iter()
            .map(|r| if r.is_granted() { Effect::Permit } else { Effect::Deny })
            .collect();
        let strategy = permission.resource_server().decision_strategy;

        if is_granted(strategy, &outcomes, outcomes.len()) {
            self.grant(permission, permission.scopes().iter().cloned());
        } else {
            self.complete_denied(permission, &result);
        }
    }

    fn on_complete(&mut self) {
        self.completed = true;
    }

    fn on_error(&mut self, error: EvaluationError) {
        tracing::warn!("Permission evaluation failed: {}", error);
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, ResourceServer, policy_types};

    fn permission(strategy: DecisionStrategy, scopes: &[&str]) -> ResourcePermission {
        let server = Arc::new(ResourceServer::new("app").with_decision_strategy(strategy));
        let resource = Arc::new(Resource::new("app", "Doc").with_scopes(scopes.iter().copied()));
        ResourcePermission::new(
            server,
            Some(resource),
            scopes.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    fn report(
        collector: &mut DecisionPermissionCollector,
        permission: &ResourcePermission,
        parent: &Arc<Policy>,
        effect: Effect,
    ) {
        let child = Arc::new(Policy::new("app", "child", policy_types::ROLE));
        collector.on_decision(&Evaluation {
            permission,
            policy: Some(&child),
            parent_policy: Some(parent),
            effect,
        });
    }

    #[test]
    fn strategies_combine_effects() {
        use Effect::{Deny, Permit};

        assert!(is_granted(DecisionStrategy::Unanimous, &[Permit, Permit], 2));
        assert!(!is_granted(DecisionStrategy::Unanimous, &[Permit, Deny], 2));
        assert!(is_granted(DecisionStrategy::Affirmative, &[Deny, Permit], 2));
        assert!(!is_granted(DecisionStrategy::Affirmative, &[Deny, Deny], 2));
        assert!(is_granted(DecisionStrategy::Consensus, &[Permit, Permit, Deny], 3));
        assert!(!is_granted(DecisionStrategy::Consensus, &[Permit, Deny], 2));
        assert!(!is_granted(DecisionStrategy::Consensus, &[Permit], 3));
    }

    #[test]
    fn granted_resource_permission_grants_requested_scopes() {
        let mut collector = DecisionPermissionCollector::new();
        let permission = permission(DecisionStrategy::Unanimous, &["read", "write"]);
        let resource_id = permission.resource().map(|r| r.id.clone()).unwrap();
        let parent = Arc::new(
            Policy::new("app", "doc", policy_types::RESOURCE).with_resources([resource_id]),
        );

        report(&mut collector, &permission, &parent, Effect::Permit);
        collector.on_complete_permission(&permission);

        let granted = collector.results();
        assert_eq!(granted.len(), 1);
        assert_eq!(
            granted[0].scopes,
            BTreeSet::from(["read".to_string(), "write".to_string()])
        );
    }

    #[test]
    fn denied_permission_keeps_passing_scope_grants() {
        let mut collector = DecisionPermissionCollector::new();
        let permission = permission(DecisionStrategy::Unanimous, &["read", "write"]);
        let read = Arc::new(Policy::new("app", "read", policy_types::SCOPE).with_scopes(["read"]));
        let write =
            Arc::new(Policy::new("app", "write", policy_types::SCOPE).with_scopes(["write"]));

        report(&mut collector, &permission, &read, Effect::Permit);
        report(&mut collector, &permission, &write, Effect::Deny);
        collector.on_complete_permission(&permission);

        let granted = collector.results();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].scopes, BTreeSet::from(["read".to_string()]));
    }

    #[test]
    fn scope_denied_elsewhere_is_not_granted() {
        let mut collector = DecisionPermissionCollector::new();
        let permission = permission(DecisionStrategy::Unanimous, &["read"]);
        let allow = Arc::new(Policy::new("app", "allow", policy_types::SCOPE).with_scopes(["read"]));
        let block = Arc::new(Policy::new("app", "block", policy_types::SCOPE).with_scopes(["read"]));

        report(&mut collector, &permission, &allow, Effect::Permit);
        report(&mut collector, &permission, &block, Effect::Deny);
        collector.on_complete_permission(&permission);

        assert!(collector.results().is_empty());
    }

    #[test]
    fn direct_verdict_grants_without_policies() {
        let mut collector = DecisionPermissionCollector::new();
        let permission = permission(DecisionStrategy::Unanimous, &["read"]);

        collector.on_decision(&Evaluation {
            permission: &permission,
            policy: None,
            parent_policy: None,
            effect: Effect::Permit,
        });

        assert_eq!(collector.results().len(), 1);
    }

    #[test]
    fn resource_less_grants_merge_by_scope() {
        let mut collector = DecisionPermissionCollector::new();
        let server = Arc::new(ResourceServer::new("app"));
        let scope_only = |scopes: &[&str]| {
            ResourcePermission::new(
                Arc::clone(&server),
                None,
                scopes.iter().map(|s| (*s).to_string()).collect(),
            )
        };
        let first = scope_only(&["read"]);
        let second = scope_only(&["read", "write"]);

        for permission in [&first, &second] {
            collector.on_decision(&Evaluation {
                permission,
                policy: None,
                parent_policy: None,
                effect: Effect::Permit,
            });
        }

        let granted = collector.results();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].resource_id, None);
        assert_eq!(
            granted[0].scopes,
            BTreeSet::from(["read".to_string(), "write".to_string()])
        );
    }

    #[test]
    fn error_surfaces_from_into_results() {
        let mut collector = DecisionPermissionCollector::new();
        collector.on_error(EvaluationError::UnknownPolicyType("js".to_string()));

        assert!(!collector.is_completed());
        assert!(matches!(
            collector.into_results(),
            Err(EvaluationError::UnknownPolicyType(t)) if t == "js"
        ));
    }
}
