//! Read-only view of the client sessions attached to a user session.

use std::collections::BTreeMap;
use std::sync::Arc;

use kc_cache::EntryStore;
use uuid::Uuid;

use crate::client_session::ClientSession;
use crate::error::{SessionError, SessionResult};

/// Client sessions of one user session, keyed by client ID.
///
/// The backing cache owns the client sessions; this view only reflects
/// them. Creating and detaching go through
/// [`UserSessionProvider`](crate::UserSessionProvider); the map-style
/// mutators always fail with [`SessionError::UnsupportedOperation`].
pub struct ClientSessionMapping {
    user_session_id: Uuid,
    entries: BTreeMap<String, ClientSession>,
    store: Arc<EntryStore<ClientSession>>,
}

impl std::fmt::Debug for ClientSessionMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSessionMapping")
            .field("user_session_id", &self.user_session_id)
            .field("clients", &self.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ClientSessionMapping {
    pub(crate) fn new(
        user_session_id: Uuid,
        entries: BTreeMap<String, ClientSession>,
        store: Arc<EntryStore<ClientSession>>,
    ) -> Self {
        Self {
            user_session_id,
            entries,
            store,
        }
    }

    /// Returns the user session this mapping belongs to.
    #[must_use]
    pub const fn user_session_id(&self) -> Uuid {
        self.user_session_id
    }

    /// Returns the client session of `client_id`.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&ClientSession> {
        self.entries.get(client_id)
    }

    /// Returns whether `client_id` has a client session.
    #[must_use]
    pub fn contains_key(&self, client_id: &str) -> bool {
        self.entries.contains_key(client_id)
    }

    /// Iterates over client IDs.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates over client sessions.
    pub fn values(&self) -> impl Iterator<Item = &ClientSession> {
        self.entries.values()
    }

    /// Iterates over `(client ID, client session)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClientSession)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of client sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether there are no client sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Not supported; use `UserSessionProvider::create_client_session`.
    ///
    /// ## Errors
    ///
    /// Always returns [`SessionError::UnsupportedOperation`].
    pub fn insert(
        &mut self,
        _client_id: String,
        _session: ClientSession,
    ) -> SessionResult<Option<ClientSession>> {
        Err(SessionError::UnsupportedOperation("insert"))
    }

    /// Not supported; use `UserSessionProvider::detach_client_session`.
    ///
    /// ## Errors
    ///
    /// Always returns [`SessionError::UnsupportedOperation`].
    pub fn remove(&mut self, _client_id: &str) -> SessionResult<Option<ClientSession>> {
        Err(SessionError::UnsupportedOperation("remove"))
    }

    /// Not supported; use [`ClientSessionMapping::on_user_session_restart`].
    ///
    /// ## Errors
    ///
    /// Always returns [`SessionError::UnsupportedOperation`].
    pub fn clear(&mut self) -> SessionResult<()> {
        Err(SessionError::UnsupportedOperation("clear"))
    }

    /// Detaches every client session from the restarted user session and
    /// empties the mapping.
    ///
    /// The detached sessions are written to the backing store as part of
    /// the current unit of work.
    ///
    /// ## Errors
    ///
    /// Returns an error if a detached session cannot be buffered.
    pub fn on_user_session_restart(&mut self) -> SessionResult<()> {
        for session in self.entries.values_mut() {
            session.detach();
            self.store.put(&session.id.to_string(), session)?;
        }
        tracing::debug!(
            "Detached {} client sessions of restarted user session {}",
            self.entries.len(),
            self.user_session_id
        );
        self.entries.clear();
        Ok(())
    }
}
