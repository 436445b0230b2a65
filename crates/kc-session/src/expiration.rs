//! Expiration of user sessions.
//!
//! [`ExpiredSessionSweep`] is a cluster-wide scheduled task that removes
//! user sessions past their idle timeout or maximum lifespan. Every expired
//! session is removed in its own unit of work: the user session first,
//! checked against the version that was judged expired, then its client
//! sessions. A session refreshed in between is left alone.
//!
//! Each removal is handed to an [`ExpirationEventWorker`], which emits the
//! `USER_SESSION_DELETED` events on its own task so the sweep never waits
//! on event delivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kc_cache::{
    CacheBackend, CacheError, ConditionalRemover, EntryStore, FnConditionalRemover, ScheduledTask,
    TaskError, caches,
};
use kc_core::event::{EventListener, EventType, details};
use kc_core::Event;
use kc_spi::KeycloakSession;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client_session::ClientSession;
use crate::user_session::UserSession;

/// Name of the expiration task in the cluster.
pub const EXPIRATION_TASK: &str = "userSessionExpiration";

/// A user session removed because it expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    /// Realm of the session.
    pub realm_id: Uuid,
    /// Owner of the session.
    pub user_id: Uuid,
    /// The removed session.
    pub session_id: Uuid,
}

impl From<&UserSession> for ExpiredSession {
    fn from(session: &UserSession) -> Self {
        Self {
            realm_id: session.realm_id,
            user_id: session.user_id,
            session_id: session.id,
        }
    }
}

/// Sending half of the expiration event channel.
#[derive(Debug, Clone)]
pub struct ExpirationNotifier {
    sender: mpsc::UnboundedSender<ExpiredSession>,
}

impl ExpirationNotifier {
    /// Queues an expiry notice without waiting.
    pub fn notify(&self, expired: ExpiredSession) {
        if self.sender.send(expired).is_err() {
            tracing::warn!("Expiration event worker is gone, dropping expiry notice");
        }
    }
}

/// Worker turning expiry notices into `USER_SESSION_DELETED` events.
pub struct ExpirationEventWorker;

impl ExpirationEventWorker {
    /// Spawns the worker. It stops once every notifier is dropped.
    #[must_use]
    pub fn spawn(listener: Arc<dyn EventListener>) -> (ExpirationNotifier, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ExpiredSession>();
        let handle = tokio::spawn(async move {
            while let Some(expired) = receiver.recv().await {
                let event = Event::builder(EventType::UserSessionDeleted)
                    .realm(expired.realm_id)
                    .user(expired.user_id)
                    .session(expired.session_id.to_string())
                    .detail(details::REASON, details::USER_SESSION_EXPIRED_REASON)
                    .build();
                listener.on_event(&event);
            }
            tracing::debug!("Expiration event worker stopped");
        });
        (ExpirationNotifier { sender }, handle)
    }
}

/// Scheduled task removing expired user sessions.
#[derive(Debug)]
pub struct ExpiredSessionSweep {
    backend: Arc<dyn CacheBackend>,
    idle_timeout_secs: i64,
    max_lifespan_secs: i64,
    notifier: Option<ExpirationNotifier>,
}

impl ExpiredSessionSweep {
    /// Creates a sweep with the given timeouts.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        idle_timeout_secs: i64,
        max_lifespan_secs: i64,
    ) -> Self {
        Self {
            backend,
            idle_timeout_secs,
            max_lifespan_secs,
            notifier: None,
        }
    }

    /// Sends a notice for every removed session to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: ExpirationNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Removes expired sessions and returns the ones actually removed.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails. Sessions removed before the
    /// failure stay removed and have been reported.
    pub async fn sweep(&self) -> Result<Vec<ExpiredSession>, TaskError> {
        let now = Utc::now();
        let (idle, max) = (self.idle_timeout_secs, self.max_lifespan_secs);
        let remover =
            FnConditionalRemover::new(move |_: &str, s: &UserSession| s.is_expired_at(now, idle, max));

        let mut expired = Vec::new();
        for key in self.backend.keys(caches::SESSIONS).await? {
            if let Some(removed) = self.expire(&key, &remover).await? {
                if let Some(notifier) = &self.notifier {
                    notifier.notify(removed.clone());
                }
                expired.push(removed);
            }
        }

        if !expired.is_empty() {
            tracing::debug!("Removed {} expired user sessions", expired.len());
        }
        Ok(expired)
    }

    async fn expire(
        &self,
        key: &str,
        remover: &dyn ConditionalRemover<UserSession>,
    ) -> Result<Option<ExpiredSession>, TaskError> {
        let sessions = EntryStore::<UserSession>::new(caches::SESSIONS, Arc::clone(&self.backend));
        let Some(user_session) = sessions.get(key).await? else {
            return Ok(None);
        };
        if !remover.should_remove(key, &user_session) {
            return Ok(None);
        }

        sessions.remove(key)?;
        match sessions.flush().await {
            Ok(()) => {}
            Err(CacheError::ConcurrentModification { .. }) => {
                tracing::debug!("User session {} changed while expiring it, keeping it", key);
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        }

        let client_sessions =
            EntryStore::<ClientSession>::new(caches::CLIENT_SESSIONS, Arc::clone(&self.backend));
        for client_session_id in user_session.client_sessions.values() {
            client_sessions.remove(&client_session_id.to_string())?;
        }
        client_sessions.flush().await?;

        Ok(Some(ExpiredSession::from(&user_session)))
    }
}

#[async_trait]
impl ScheduledTask for ExpiredSessionSweep {
    fn task_name(&self) -> &str {
        EXPIRATION_TASK
    }

    async fn run(&self, _session: &KeycloakSession) -> Result<(), TaskError> {
        self.sweep().await.map(|_| ())
    }
}
