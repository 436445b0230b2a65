//! Evaluation of a whole authorization request.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use kc_core::Event;
use kc_core::event::EventType;

use crate::context::EvaluationContext;
use crate::decision::{Decision, DecisionPermissionCollector};
use crate::error::{EvaluationError, EvaluationResult};
use crate::model::ResourceServer;
use crate::permissions::{self, AuthorizationRequest, Permission};
use crate::policy::DecisionCache;
use crate::provider::AuthorizationProvider;

/// Lifecycle of a [`PermissionEvaluator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    /// Not evaluated yet.
    Idle,
    /// Evaluation is running.
    Evaluating,
    /// Evaluation finished and the decision completed.
    Completed,
    /// Evaluation failed and the decision received the error.
    Errored,
}

/// Evaluates every permission of a request against one resource server.
///
/// An evaluator runs once. The authorization store is read-only while it
/// runs.
#[derive(Debug)]
pub struct PermissionEvaluator<'a> {
    authorization: &'a AuthorizationProvider,
    resource_server: Arc<ResourceServer>,
    context: &'a EvaluationContext,
    request: AuthorizationRequest,
    state: EvaluationState,
}

impl<'a> PermissionEvaluator<'a> {
    pub(crate) fn new(
        authorization: &'a AuthorizationProvider,
        resource_server: Arc<ResourceServer>,
        context: &'a EvaluationContext,
        request: AuthorizationRequest,
    ) -> Self {
        Self {
            authorization,
            resource_server,
            context,
            request,
            state: EvaluationState::Idle,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> EvaluationState {
        self.state
    }

    /// Runs the evaluation, reporting to `decision`, and hands the decision
    /// back.
    ///
    /// Errors and panics raised while evaluating policies reach
    /// [`Decision::on_error`]; otherwise [`Decision::on_complete`] is
    /// called.
    pub fn evaluate<D: Decision>(&mut self, mut decision: D) -> D {
        if self.state != EvaluationState::Idle {
            decision.on_error(EvaluationError::AlreadyEvaluated);
            return decision;
        }
        self.state = EvaluationState::Evaluating;

        let outcome = {
            let _read_only = self.authorization.store().enter_read_only();
            catch_unwind(AssertUnwindSafe(|| self.evaluate_all(&mut decision)))
                .unwrap_or_else(|panic| Err(EvaluationError::Panicked(panic_message(&*panic))))
        };

        match outcome {
            Ok(()) => {
                decision.on_complete();
                self.state = EvaluationState::Completed;
                self.emit(None);
            }
            Err(error) => {
                tracing::debug!(
                    "Evaluation against resource server {} failed: {}",
                    self.resource_server.id,
                    error
                );
                self.emit(Some(&error));
                decision.on_error(error);
                self.state = EvaluationState::Errored;
            }
        }
        decision
    }

    /// Runs the evaluation with the decision built by `factory`.
    pub fn get_decision<D, F>(&mut self, factory: F) -> D
    where
        D: Decision,
        F: FnOnce(&ResourceServer) -> D,
    {
        let decision = factory(&self.resource_server);
        self.evaluate(decision)
    }

    /// Runs the evaluation and returns the granted permissions.
    ///
    /// ## Errors
    ///
    /// Returns the error evaluation failed with.
    pub fn evaluate_granted(&mut self) -> EvaluationResult<Vec<Permission>> {
        self.get_decision(|_| DecisionPermissionCollector::new())
            .into_results()
    }

    fn evaluate_all(&self, decision: &mut dyn Decision) -> EvaluationResult<()> {
        let store = self.authorization.store();
        let permissions = permissions::all(store, &self.resource_server, &self.request)?;
        let evaluator = self.authorization.policy_evaluator();
        let mut cache = DecisionCache::new();
        for permission in &permissions {
            evaluator.evaluate(permission, self.authorization, self.context, decision, &mut cache)?;
        }
        tracing::debug!(
            "Evaluated {} permissions against resource server {}",
            permissions.len(),
            self.resource_server.id
        );
        Ok(())
    }

    fn emit(&self, error: Option<&EvaluationError>) {
        let Some(listener) = self.authorization.event_listener() else {
            return;
        };
        let mut builder = Event::builder(EventType::PermissionEvaluated)
            .client(self.resource_server.id.clone())
            .detail("identity", self.context.identity().id.clone());
        if let Some(error) = error {
            builder = builder.failure(error.to_string());
        }
        listener.on_event(&builder.build());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use kc_core::event::{EventListener, EventOutcome, InMemoryEventListener};

    use super::*;
    use crate::context::Identity;
    use crate::model::{Policy, policy_types};
    use crate::permissions::PermissionRequest;
    use crate::store::StoreError;
    use crate::test_support::{Fixture, PanickingProvider, SERVER, WritingProvider};

    fn protect_doc_with(fixture: &Fixture, policy_type: &str) {
        let policy = fixture.add_policy(Policy::new(SERVER, "custom", policy_type));
        fixture.add_policy(
            Policy::new(SERVER, "doc permission", policy_types::RESOURCE)
                .with_resources([fixture.doc.id.clone()])
                .with_policies([policy.id.clone()]),
        );
    }

    #[test]
    fn evaluate_granted_returns_permissions() {
        let fixture = Fixture::enforcing();
        fixture.protect_doc_with_role("admin");
        let authorization = fixture.provider();
        let context = EvaluationContext::new(Identity::new("a").with_realm_roles(["admin"]));

        let mut evaluator = authorization.evaluator(
            Arc::clone(&fixture.server),
            &context,
            AuthorizationRequest::all().with_permission(PermissionRequest::resource("Doc")),
        );
        let granted = evaluator.evaluate_granted().unwrap();

        assert_eq!(evaluator.state(), EvaluationState::Completed);
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].resource_name.as_deref(), Some("Doc"));
        assert!(!authorization.store().is_read_only());
    }

    #[test]
    fn panicking_policy_reaches_on_error_and_restores_store() {
        let mut fixture = Fixture::enforcing();
        fixture.registry.register("crashing", PanickingProvider);
        protect_doc_with(&fixture, "crashing");
        let authorization = fixture.provider();
        let context = EvaluationContext::new(Identity::new("a"));

        let mut evaluator =
            authorization.evaluator(Arc::clone(&fixture.server), &context, AuthorizationRequest::all());
        let collector = evaluator.evaluate(DecisionPermissionCollector::new());

        assert_eq!(evaluator.state(), EvaluationState::Errored);
        assert!(matches!(
            collector.into_results(),
            Err(EvaluationError::Panicked(message)) if message == "policy script crashed"
        ));
        assert!(!authorization.store().is_read_only());
    }

    #[test]
    fn writes_during_evaluation_are_rejected() {
        let mut fixture = Fixture::enforcing();
        fixture.registry.register("writing", WritingProvider);
        protect_doc_with(&fixture, "writing");
        let authorization = fixture.provider();
        let context = EvaluationContext::new(Identity::new("a"));

        let result = authorization
            .evaluator(Arc::clone(&fixture.server), &context, AuthorizationRequest::all())
            .evaluate_granted();

        assert!(matches!(result, Err(EvaluationError::Store(StoreError::ReadOnly))));
        assert!(!authorization.store().is_read_only());
        assert!(authorization.store().scopes().find_by_name(SERVER, "sneaky").is_none());
    }

    #[test]
    fn pre_existing_read_only_mode_is_kept() {
        let fixture = Fixture::enforcing();
        let authorization = fixture.provider();
        let context = EvaluationContext::new(Identity::new("a"));
        let _outer = authorization.store().enter_read_only();

        authorization
            .evaluator(Arc::clone(&fixture.server), &context, AuthorizationRequest::all())
            .evaluate_granted()
            .unwrap();

        assert!(authorization.store().is_read_only());
    }

    #[test]
    fn evaluator_runs_once() {
        let fixture = Fixture::enforcing();
        let authorization = fixture.provider();
        let context = EvaluationContext::new(Identity::new("a"));
        let mut evaluator =
            authorization.evaluator(Arc::clone(&fixture.server), &context, AuthorizationRequest::all());

        evaluator.evaluate_granted().unwrap();
        let second = evaluator.evaluate_granted();

        assert!(matches!(second, Err(EvaluationError::AlreadyEvaluated)));
        assert_eq!(evaluator.state(), EvaluationState::Completed);
    }

    #[test]
    fn get_decision_builds_decision_from_resource_server() {
        struct Counter {
            server: String,
            decisions: usize,
            completed: bool,
        }

        impl Decision for Counter {
            fn on_decision(&mut self, _evaluation: &crate::decision::Evaluation<'_>) {
                self.decisions += 1;
            }

            fn on_complete(&mut self) {
                self.completed = true;
            }

            fn on_error(&mut self, error: EvaluationError) {
                panic!("unexpected error: {error}");
            }
        }

        let fixture = Fixture::enforcing();
        fixture.protect_doc_with_role("admin");
        let authorization = fixture.provider();
        let context = EvaluationContext::new(Identity::new("a"));

        let counter = authorization
            .evaluator(Arc::clone(&fixture.server), &context, AuthorizationRequest::all())
            .get_decision(|server| Counter {
                server: server.id.clone(),
                decisions: 0,
                completed: false,
            });

        assert_eq!(counter.server, SERVER);
        assert_eq!(counter.decisions, 1);
        assert!(counter.completed);
    }

    #[test]
    fn evaluations_are_reported_as_events() {
        let fixture = Fixture::enforcing();
        let listener = Arc::new(InMemoryEventListener::new());
        let authorization = fixture
            .provider()
            .with_event_listener(Arc::clone(&listener) as Arc<dyn EventListener>);
        let context = EvaluationContext::new(Identity::new("alice"));

        authorization
            .evaluator(Arc::clone(&fixture.server), &context, AuthorizationRequest::all())
            .evaluate_granted()
            .unwrap();
        let failed = authorization
            .evaluator(
                Arc::clone(&fixture.server),
                &context,
                AuthorizationRequest::all().with_permission(PermissionRequest::resource("Nope")),
            )
            .evaluate_granted();

        assert!(failed.is_err());
        let events = listener.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::PermissionEvaluated);
        assert_eq!(events[0].outcome, EventOutcome::Success);
        assert_eq!(events[0].detail("identity"), Some("alice"));
        assert_eq!(events[1].outcome, EventOutcome::Failure);
    }
}
