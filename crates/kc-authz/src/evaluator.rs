//! Evaluation of the policies applying to one permission.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::decision::{Decision, Evaluation};
use crate::error::EvaluationResult;
use crate::model::{Effect, Policy, PolicyEnforcementMode};
use crate::permissions::ResourcePermission;
use crate::policy::{DecisionCache, PolicyEvaluation};
use crate::provider::AuthorizationProvider;

/// Finds and evaluates the permission policies of a permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    /// Evaluates `permission` and reports to `decision`.
    ///
    /// Permission policies come from the resource, its type, and the
    /// requested scopes; each one is evaluated at most once. When none
    /// applies, a permissive resource server grants and an enforcing one
    /// reports nothing.
    ///
    /// ## Errors
    ///
    /// Returns an error if a policy type has no provider or a policy cannot
    /// be evaluated.
    pub fn evaluate(
        &self,
        permission: &ResourcePermission,
        authorization: &AuthorizationProvider,
        context: &EvaluationContext,
        decision: &mut dyn Decision,
        cache: &mut DecisionCache,
    ) -> EvaluationResult<()> {
        let resource_server = permission.resource_server();
        if resource_server.policy_enforcement_mode == PolicyEnforcementMode::Disabled
            || permission.is_granted()
        {
            decision.on_decision(&Evaluation {
                permission,
                policy: None,
                parent_policy: None,
                effect: Effect::Permit,
            });
            return Ok(());
        }

        let policies = Self::applicable_policies(permission, authorization);
        let verified = !policies.is_empty();

        for policy in policies {
            let provider = authorization.policy_provider(&policy.policy_type)?;
            let mut evaluation =
                PolicyEvaluation::new(authorization, permission, context, Arc::clone(&policy), cache);
            provider.evaluate(&mut evaluation)?;
            let (effect, outcomes) = evaluation.into_outcome();

            if outcomes.is_empty() {
                if let Some(effect) = effect {
                    decision.on_decision(&Evaluation {
                        permission,
                        policy: Some(&policy),
                        parent_policy: None,
                        effect,
                    });
                }
                continue;
            }
            for (associated, effect) in &outcomes {
                decision.on_decision(&Evaluation {
                    permission,
                    policy: Some(associated),
                    parent_policy: Some(&policy),
                    effect: *effect,
                });
            }
        }

        if verified {
            decision.on_complete_permission(permission);
        } else if resource_server.policy_enforcement_mode == PolicyEnforcementMode::Permissive {
            tracing::debug!("No policy applies to {}, granting in permissive mode", permission.key());
            decision.on_decision(&Evaluation {
                permission,
                policy: None,
                parent_policy: None,
                effect: Effect::Permit,
            });
        }
        Ok(())
    }

    fn applicable_policies(
        permission: &ResourcePermission,
        authorization: &AuthorizationProvider,
    ) -> Vec<Arc<Policy>> {
        let server_id = &permission.resource_server().id;
        let store = authorization.store();
        let mut seen = HashSet::new();
        let mut policies = Vec::new();
        let mut add = |found: Vec<Arc<Policy>>| {
            for policy in found {
                if seen.insert(policy.id.clone()) {
                    policies.push(policy);
                }
            }
        };

        if let Some(resource) = permission.resource() {
            add(store.policies().find_by_resource(server_id, &resource.id));
            if let Some(resource_type) = &resource.resource_type {
                add(store.policies().find_by_resource_type(server_id, resource_type));
                if !resource.is_owned_by_server() {
                    for typed in store.resources().find_by_type(server_id, resource_type) {
                        if typed.is_owned_by_server() {
                            add(store.policies().find_by_resource(server_id, &typed.id));
                        }
                    }
                }
            }
        }
        if !permission.scopes().is_empty() {
            add(store
                .policies()
                .find_by_scopes(server_id, permission.resource(), permission.scopes()));
        }
        policies
    }
}
