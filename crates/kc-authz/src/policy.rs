//! Policy providers and the evaluation they operate on.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::error::{EvaluationError, EvaluationResult};
use crate::model::{Effect, Logic, Policy};
use crate::permissions::ResourcePermission;
use crate::provider::AuthorizationProvider;

/// Nesting depth at which associated policies are assumed to form a cycle.
const MAX_NESTING: usize = 32;

/// Evaluates policies of one type.
pub trait PolicyProvider: Send + Sync + Debug {
    /// Decides on `evaluation`'s policy by calling
    /// [`PolicyEvaluation::grant`] or [`PolicyEvaluation::deny`].
    ///
    /// Leaving the evaluation undecided counts as a denial.
    ///
    /// ## Errors
    ///
    /// Returns an error if the policy cannot be evaluated.
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()>;
}

/// Effects of associated policies already evaluated in the current pass,
/// keyed by policy and subject.
#[derive(Debug, Default)]
pub struct DecisionCache {
    effects: HashMap<(String, String), Effect>,
}

impl DecisionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached effect of `policy_id` for `identity_id`.
    #[must_use]
    pub fn get(&self, policy_id: &str, identity_id: &str) -> Option<Effect> {
        self.effects
            .get(&(policy_id.to_string(), identity_id.to_string()))
            .copied()
    }

    /// Records an effect.
    pub fn insert(&mut self, policy_id: &str, identity_id: &str, effect: Effect) {
        self.effects
            .insert((policy_id.to_string(), identity_id.to_string()), effect);
    }

    /// Returns the number of cached effects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Returns whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Evaluation of one policy for one permission.
pub struct PolicyEvaluation<'a> {
    authorization: &'a AuthorizationProvider,
    permission: &'a ResourcePermission,
    context: &'a EvaluationContext,
    policy: Arc<Policy>,
    parent_policy: Option<Arc<Policy>>,
    cache: &'a mut DecisionCache,
    depth: usize,
    effect: Option<Effect>,
    outcomes: Vec<(Arc<Policy>, Effect)>,
}

impl Debug for PolicyEvaluation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEvaluation")
            .field("policy", &self.policy.name)
            .field("permission", &self.permission.key())
            .field("effect", &self.effect)
            .finish_non_exhaustive()
    }
}

impl<'a> PolicyEvaluation<'a> {
    pub(crate) fn new(
        authorization: &'a AuthorizationProvider,
        permission: &'a ResourcePermission,
        context: &'a EvaluationContext,
        policy: Arc<Policy>,
        cache: &'a mut DecisionCache,
    ) -> Self {
        Self {
            authorization,
            permission,
            context,
            policy,
            parent_policy: None,
            cache,
            depth: 0,
            effect: None,
            outcomes: Vec::new(),
        }
    }

    /// Returns the policy being evaluated.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Returns the policy this one is associated with, if any.
    #[must_use]
    pub fn parent_policy(&self) -> Option<&Policy> {
        self.parent_policy.as_deref()
    }

    /// Returns the permission being decided.
    #[must_use]
    pub const fn permission(&self) -> &ResourcePermission {
        self.permission
    }

    /// Returns the request context.
    #[must_use]
    pub const fn context(&self) -> &EvaluationContext {
        self.context
    }

    /// Returns the authorization provider running the evaluation.
    #[must_use]
    pub const fn authorization(&self) -> &AuthorizationProvider {
        self.authorization
    }

    /// Returns the decided effect, after logic.
    #[must_use]
    pub const fn effect(&self) -> Option<Effect> {
        self.effect
    }

    /// Grants, or denies under negative logic.
    pub fn grant(&mut self) {
        self.effect = Some(match self.policy.logic {
            Logic::Positive => Effect::Permit,
            Logic::Negative => Effect::Deny,
        });
    }

    /// Denies, or grants under negative logic.
    pub fn deny(&mut self) {
        self.effect = Some(match self.policy.logic {
            Logic::Positive => Effect::Deny,
            Logic::Negative => Effect::Permit,
        });
    }

    /// Denies if no effect was decided yet.
    pub fn deny_if_no_effect(&mut self) {
        if self.effect.is_none() {
            self.deny();
        }
    }

    /// Loads the policies associated with the current policy.
    ///
    /// ## Errors
    ///
    /// Returns [`EvaluationError::PolicyNotFound`] for a dangling reference.
    pub fn associated_policies(&self) -> EvaluationResult<Vec<Arc<Policy>>> {
        let policies = self.authorization.store().policies();
        self.policy
            .associated_policies
            .iter()
            .map(|id| {
                policies
                    .find_by_id(id)
                    .ok_or_else(|| EvaluationError::PolicyNotFound(id.clone()))
            })
            .collect()
    }

    /// Evaluates an associated policy, reusing its effect if it was already
    /// decided for the same subject in this pass.
    ///
    /// ## Errors
    ///
    /// Returns an error if the associated policy cannot be evaluated.
    pub fn evaluate_associated(&mut self, policy: &Arc<Policy>) -> EvaluationResult<Effect> {
        let identity_id = &self.context.identity().id;
        if let Some(effect) = self.cache.get(&policy.id, identity_id) {
            return Ok(effect);
        }
        if self.depth >= MAX_NESTING {
            return Err(EvaluationError::invalid_configuration(
                &policy.name,
                "associated policies nest too deeply",
            ));
        }

        let provider = self.authorization.policy_provider(&policy.policy_type)?;
        let mut nested = PolicyEvaluation {
            authorization: self.authorization,
            permission: self.permission,
            context: self.context,
            policy: Arc::clone(policy),
            parent_policy: Some(Arc::clone(&self.policy)),
            cache: &mut *self.cache,
            depth: self.depth + 1,
            effect: None,
            outcomes: Vec::new(),
        };
        provider.evaluate(&mut nested)?;
        nested.deny_if_no_effect();
        let effect = nested.effect.unwrap_or(Effect::Deny);

        self.cache.insert(&policy.id, &self.context.identity().id, effect);
        Ok(effect)
    }

    /// Records the effect of an associated policy for the decision.
    pub fn record(&mut self, policy: Arc<Policy>, effect: Effect) {
        self.outcomes.push((policy, effect));
    }

    pub(crate) fn into_outcome(self) -> (Option<Effect>, Vec<(Arc<Policy>, Effect)>) {
        (self.effect, self.outcomes)
    }
}
