//! Unit-of-work transactions.
//!
//! Providers enlist their buffered stores in the session's
//! [`TransactionManager`]. Committing the manager commits every enlisted
//! transaction in enlistment order and then notifies the after-completion
//! listeners with the final outcome.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors raised while completing a unit of work.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// An optimistic version check failed; re-read and retry the unit of work.
    #[error("concurrent modification of '{key}'")]
    ConcurrentModification {
        /// Key whose version changed.
        key: String,
    },

    /// The transaction was already committed or rolled back.
    #[error("transaction is not active")]
    NotActive,

    /// The transaction was marked rollback-only and has been rolled back.
    #[error("transaction was marked rollback-only")]
    RollbackOnly,

    /// The backing store failed.
    #[error("transaction backend error: {0}")]
    Backend(String),
}

impl TransactionError {
    /// Returns whether retrying the whole unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// A transactional resource enlisted in a unit of work.
#[async_trait]
pub trait KeycloakTransaction: Send + Sync {
    /// Makes buffered changes visible.
    async fn commit(&self) -> Result<(), TransactionError>;

    /// Discards buffered changes.
    async fn rollback(&self) -> Result<(), TransactionError>;
}

/// Final outcome of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// All enlisted transactions committed.
    Committed,
    /// The unit of work was rolled back.
    RolledBack,
}

/// Callback invoked once the unit of work is complete.
pub trait AfterCompletion: Send {
    /// Receives the final outcome.
    fn after_completion(self: Box<Self>, outcome: TransactionOutcome);
}

/// Resumes a waiting response once the unit of work completes.
///
/// The receiver obtains `on_commit` when the transaction commits and
/// `on_rollback` otherwise, so a response is never sent before the data it
/// refers to is visible to other nodes.
pub struct AsyncResponse<T> {
    sender: oneshot::Sender<T>,
    on_commit: T,
    on_rollback: T,
}

impl<T: Send + 'static> AsyncResponse<T> {
    /// Enlists a response in `manager` and returns the receiving half.
    pub fn finish_in_transaction(
        manager: &TransactionManager,
        on_commit: T,
        on_rollback: T,
    ) -> oneshot::Receiver<T> {
        let (sender, receiver) = oneshot::channel();
        manager.enlist_after_completion(Box::new(Self {
            sender,
            on_commit,
            on_rollback,
        }));
        receiver
    }
}

impl<T: Send> AfterCompletion for AsyncResponse<T> {
    fn after_completion(self: Box<Self>, outcome: TransactionOutcome) {
        let this = *self;
        let response = match outcome {
            TransactionOutcome::Committed => this.on_commit,
            TransactionOutcome::RolledBack => this.on_rollback,
        };
        if this.sender.send(response).is_err() {
            tracing::debug!("Async response receiver dropped before completion");
        }
    }
}

/// State of a [`TransactionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting enlistments.
    Active,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// Coordinates the transactions of one session.
pub struct TransactionManager {
    state: Mutex<TransactionState>,
    rollback_only: Mutex<bool>,
    transactions: Mutex<Vec<Arc<dyn KeycloakTransaction>>>,
    after_completion: Mutex<Vec<Box<dyn AfterCompletion>>>,
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("state", &*self.state.lock())
            .field("rollback_only", &*self.rollback_only.lock())
            .field("enlisted", &self.transactions.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Creates an active manager with nothing enlisted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransactionState::Active),
            rollback_only: Mutex::new(false),
            transactions: Mutex::new(Vec::with_capacity(4)),
            after_completion: Mutex::new(Vec::new()),
        }
    }

    /// Enlists a transaction.
    pub fn enlist(&self, transaction: Arc<dyn KeycloakTransaction>) {
        self.transactions.lock().push(transaction);
    }

    /// Enlists a listener notified after commit or rollback.
    pub fn enlist_after_completion(&self, listener: Box<dyn AfterCompletion>) {
        self.after_completion.lock().push(listener);
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Returns whether the unit of work is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns whether any transaction was enlisted.
    #[must_use]
    pub fn has_enlisted(&self) -> bool {
        !self.transactions.lock().is_empty()
    }

    /// Marks the unit of work so that `commit` rolls back instead.
    pub fn set_rollback_only(&self) {
        *self.rollback_only.lock() = true;
    }

    /// Returns whether the unit of work is marked rollback-only.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        *self.rollback_only.lock()
    }

    /// Commits every enlisted transaction in enlistment order.
    ///
    /// Commits are atomic per enlisted transaction, not across them: when
    /// one fails, the remaining ones are rolled back and the error returned.
    ///
    /// ## Errors
    ///
    /// Returns [`TransactionError::NotActive`] on a completed manager,
    /// [`TransactionError::RollbackOnly`] if marked rollback-only, or the
    /// first commit error.
    pub async fn commit(&self) -> Result<(), TransactionError> {
        self.begin_completion()?;

        if self.is_rollback_only() {
            self.rollback_all(self.take_transactions()).await;
            self.finish(TransactionState::RolledBack);
            return Err(TransactionError::RollbackOnly);
        }

        let mut pending = self.take_transactions().into_iter();
        while let Some(transaction) = pending.next() {
            if let Err(error) = transaction.commit().await {
                tracing::debug!("Commit failed, rolling back remaining transactions: {}", error);
                self.rollback_all(pending.collect()).await;
                self.finish(TransactionState::RolledBack);
                return Err(error);
            }
        }

        self.finish(TransactionState::Committed);
        Ok(())
    }

    /// Rolls back every enlisted transaction.
    ///
    /// ## Errors
    ///
    /// Returns [`TransactionError::NotActive`] on a completed manager.
    pub async fn rollback(&self) -> Result<(), TransactionError> {
        self.begin_completion()?;
        self.rollback_all(self.take_transactions()).await;
        self.finish(TransactionState::RolledBack);
        Ok(())
    }

    fn begin_completion(&self) -> Result<(), TransactionError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TransactionError::NotActive)
        }
    }

    fn take_transactions(&self) -> Vec<Arc<dyn KeycloakTransaction>> {
        std::mem::take(&mut *self.transactions.lock())
    }

    async fn rollback_all(&self, transactions: Vec<Arc<dyn KeycloakTransaction>>) {
        for transaction in transactions {
            if let Err(error) = transaction.rollback().await {
                tracing::warn!("Rollback of enlisted transaction failed: {}", error);
            }
        }
    }

    fn finish(&self, state: TransactionState) {
        *self.state.lock() = state;
        let outcome = match state {
            TransactionState::Committed => TransactionOutcome::Committed,
            _ => TransactionOutcome::RolledBack,
        };
        let listeners = std::mem::take(&mut *self.after_completion.lock());
        for listener in listeners {
            listener.after_completion(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Recording {
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl KeycloakTransaction for Recording {
        async fn commit(&self) -> Result<(), TransactionError> {
            if self.fail {
                return Err(TransactionError::ConcurrentModification {
                    key: "k".to_string(),
                });
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self) -> Result<(), TransactionError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn commit_runs_enlisted_and_resumes_response() {
        let manager = TransactionManager::new();
        let tx = Arc::new(Recording::default());
        manager.enlist(tx.clone());
        let response = AsyncResponse::finish_in_transaction(&manager, "ok", "error");

        manager.commit().await.unwrap();

        assert_eq!(tx.commits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), TransactionState::Committed);
        assert_eq!(response.await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_the_rest() {
        let manager = TransactionManager::new();
        let failing = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let later = Arc::new(Recording::default());
        manager.enlist(failing);
        manager.enlist(later.clone());
        let response = AsyncResponse::finish_in_transaction(&manager, "ok", "error");

        let err = manager.commit().await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(later.commits.load(Ordering::SeqCst), 0);
        assert_eq!(later.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(response.await.unwrap(), "error");
    }

    #[tokio::test]
    async fn rollback_only_prevents_commit() {
        let manager = TransactionManager::new();
        let tx = Arc::new(Recording::default());
        manager.enlist(tx.clone());
        manager.set_rollback_only();

        assert!(matches!(manager.commit().await, Err(TransactionError::RollbackOnly)));
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
        assert!(matches!(manager.commit().await, Err(TransactionError::NotActive)));
    }
}
