//! Built-in policy providers.

use chrono::{DateTime, Utc};

use crate::decision::is_granted;
use crate::error::{EvaluationError, EvaluationResult};
use crate::policy::{PolicyEvaluation, PolicyProvider};

/// Config keys of the built-in providers.
pub mod config {
    /// Roles of which the identity needs any, for `role` policies.
    pub const ROLES: &str = "roles";
    /// Roles the identity needs all of, for `role` policies.
    pub const REQUIRED_ROLES: &str = "requiredRoles";
    /// Granted user IDs, for `user` policies.
    pub const USERS: &str = "users";
    /// Granted client IDs, for `client` policies.
    pub const CLIENTS: &str = "clients";
    /// RFC 3339 start of the window, for `time` policies.
    pub const NOT_BEFORE: &str = "notBefore";
    /// RFC 3339 end of the window, exclusive, for `time` policies.
    pub const NOT_ON_OR_AFTER: &str = "notOnOrAfter";
}

/// Evaluates `resource` and `scope` permissions.
///
/// Each associated policy is evaluated and its effect recorded; the
/// decision combines them using the permission's strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionPolicyProvider;

impl PolicyProvider for PermissionPolicyProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        for associated in evaluation.associated_policies()? {
            let effect = evaluation.evaluate_associated(&associated)?;
            evaluation.record(associated, effect);
        }
        Ok(())
    }
}

/// Combines associated policies using the aggregate's own strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatePolicyProvider;

impl PolicyProvider for AggregatePolicyProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        let associated = evaluation.associated_policies()?;
        let mut effects = Vec::with_capacity(associated.len());
        for policy in &associated {
            effects.push(evaluation.evaluate_associated(policy)?);
        }
        if is_granted(evaluation.policy().decision_strategy, &effects, associated.len()) {
            evaluation.grant();
        } else {
            evaluation.deny();
        }
        Ok(())
    }
}

/// Grants identities holding roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicyProvider;

impl PolicyProvider for RolePolicyProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        let policy = evaluation.policy();
        let any_of = policy.config_list(config::ROLES);
        let all_of = policy.config_list(config::REQUIRED_ROLES);
        if any_of.is_empty() && all_of.is_empty() {
            return Err(EvaluationError::invalid_configuration(&policy.name, "no roles configured"));
        }

        let identity = evaluation.context().identity();
        let granted = all_of.iter().all(|role| identity.has_role(role))
            && (any_of.is_empty() || any_of.iter().any(|role| identity.has_role(role)));
        if granted {
            evaluation.grant();
        }
        Ok(())
    }
}

/// Grants listed users.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserPolicyProvider;

impl PolicyProvider for UserPolicyProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        let subject = &evaluation.context().identity().id;
        if evaluation
            .policy()
            .config_list(config::USERS)
            .contains(&subject.as_str())
        {
            evaluation.grant();
        }
        Ok(())
    }
}

/// Grants requests issued by listed clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientPolicyProvider;

impl PolicyProvider for ClientPolicyProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        let Some(client_id) = evaluation.context().client_id() else {
            return Ok(());
        };
        if evaluation
            .policy()
            .config_list(config::CLIENTS)
            .contains(&client_id)
        {
            evaluation.grant();
        }
        Ok(())
    }
}

/// Grants requests evaluated within a time window.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimePolicyProvider;

impl TimePolicyProvider {
    fn bound(
        evaluation: &PolicyEvaluation<'_>,
        key: &str,
    ) -> EvaluationResult<Option<DateTime<Utc>>> {
        let policy = evaluation.policy();
        policy
            .config_value(key)
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|time| time.with_timezone(&Utc))
                    .map_err(|e| EvaluationError::invalid_configuration(&policy.name, format!("{key}: {e}")))
            })
            .transpose()
    }
}

impl PolicyProvider for TimePolicyProvider {
    fn evaluate(&self, evaluation: &mut PolicyEvaluation<'_>) -> EvaluationResult<()> {
        let not_before = Self::bound(evaluation, config::NOT_BEFORE)?;
        let not_on_or_after = Self::bound(evaluation, config::NOT_ON_OR_AFTER)?;
        if not_before.is_none() && not_on_or_after.is_none() {
            return Err(EvaluationError::invalid_configuration(
                &evaluation.policy().name,
                "no time window configured",
            ));
        }

        let now = evaluation.context().current_time();
        let started = not_before.is_none_or(|start| now >= start);
        let ended = not_on_or_after.is_some_and(|end| now >= end);
        if started && !ended {
            evaluation.grant();
        }
        Ok(())
    }
}
