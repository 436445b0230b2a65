//! Evaluation errors.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that abort a permission evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// No policy provider is registered for the policy's type.
    #[error("unknown policy type: {0}")]
    UnknownPolicyType(String),

    /// A policy references another policy that does not exist.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// The request names a resource or scope that does not exist.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A policy carries an unusable configuration.
    #[error("invalid configuration of policy {policy}: {reason}")]
    InvalidConfiguration {
        /// Policy name.
        policy: String,
        /// What is wrong.
        reason: String,
    },

    /// The evaluator was already used.
    #[error("permission evaluator already used")]
    AlreadyEvaluated,

    /// A policy provider panicked.
    #[error("policy evaluation panicked: {0}")]
    Panicked(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EvaluationError {
    pub(crate) fn invalid_configuration(policy: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            policy: policy.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for evaluation.
pub type EvaluationResult<T> = Result<T, EvaluationError>;
