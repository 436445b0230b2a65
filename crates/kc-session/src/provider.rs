//! User session provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use kc_cache::{CacheBackend, EntryStore, caches};
use kc_spi::{
    KeycloakSession, Provider, ProviderFactory, ProviderMetadata, Spi, SpiError, TransactionManager,
};
use uuid::Uuid;

use crate::client_session::ClientSession;
use crate::error::{SessionError, SessionResult};
use crate::mapping::ClientSessionMapping;
use crate::user_session::UserSession;

/// Name of the user session SPI.
pub const USER_SESSION_SPI: &str = "userSessions";

/// The user session SPI.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSessionSpi;

impl Spi for UserSessionSpi {
    fn name(&self) -> &'static str {
        USER_SESSION_SPI
    }
}

/// Per-session access to user and client sessions.
///
/// Both stores are enlisted in the unit of work they were created for; all
/// writes become visible when it commits. Obtain one provider per unit of
/// work so reads see earlier writes.
#[derive(Debug)]
pub struct UserSessionProvider {
    sessions: Arc<EntryStore<UserSession>>,
    client_sessions: Arc<EntryStore<ClientSession>>,
}

impl Provider for UserSessionProvider {}

impl UserSessionProvider {
    /// Creates a provider whose stores are enlisted in `manager`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, manager: &TransactionManager) -> Self {
        Self {
            sessions: EntryStore::enlisted(caches::SESSIONS, Arc::clone(&backend), manager),
            client_sessions: EntryStore::enlisted(caches::CLIENT_SESSIONS, backend, manager),
        }
    }

    /// Stores a new user session.
    ///
    /// ## Errors
    ///
    /// Returns an error if the session cannot be encoded.
    pub fn add_user_session(&self, session: &UserSession) -> SessionResult<()> {
        self.sessions.put(&session.id.to_string(), session)?;
        Ok(())
    }

    /// Loads a user session.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails.
    pub async fn get_user_session(&self, id: Uuid) -> SessionResult<Option<UserSession>> {
        Ok(self.sessions.get(&id.to_string()).await?)
    }

    /// Writes back a modified user session.
    ///
    /// ## Errors
    ///
    /// Returns an error if the session cannot be encoded.
    pub fn update_user_session(&self, session: &UserSession) -> SessionResult<()> {
        self.add_user_session(session)
    }

    /// Removes a user session together with its client sessions.
    ///
    /// ## Errors
    ///
    /// Returns an error if the store is no longer active.
    pub fn remove_user_session(&self, session: &UserSession) -> SessionResult<()> {
        for client_session_id in session.client_sessions.values() {
            self.client_sessions.remove(&client_session_id.to_string())?;
        }
        self.sessions.remove(&session.id.to_string())?;
        Ok(())
    }

    /// Creates a client session for `client_id` in `user_session`.
    ///
    /// A client session previously attached for the same client is
    /// detached first.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails.
    pub async fn create_client_session(
        &self,
        user_session: &mut UserSession,
        client_id: &str,
        protocol: &str,
    ) -> SessionResult<ClientSession> {
        self.detach_client_session(user_session, client_id).await?;

        let client_session =
            ClientSession::new(user_session.id, client_id, user_session.realm_id, protocol);
        self.client_sessions
            .put(&client_session.id.to_string(), &client_session)?;
        user_session
            .client_sessions
            .insert(client_id.to_string(), client_session.id);
        self.update_user_session(user_session)?;

        tracing::debug!(
            "Created client session {} for client {} in user session {}",
            client_session.id,
            client_id,
            user_session.id
        );
        Ok(client_session)
    }

    /// Loads a client session.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails.
    pub async fn get_client_session(&self, id: Uuid) -> SessionResult<Option<ClientSession>> {
        Ok(self.client_sessions.get(&id.to_string()).await?)
    }

    /// Writes back a modified client session.
    ///
    /// ## Errors
    ///
    /// Returns an error if the session cannot be encoded.
    pub fn update_client_session(&self, session: &ClientSession) -> SessionResult<()> {
        self.client_sessions.put(&session.id.to_string(), session)?;
        Ok(())
    }

    /// Detaches the client session of `client_id` from `user_session`.
    ///
    /// Returns whether a client session was detached.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails.
    pub async fn detach_client_session(
        &self,
        user_session: &mut UserSession,
        client_id: &str,
    ) -> SessionResult<bool> {
        let Some(client_session_id) = user_session.client_sessions.remove(client_id) else {
            return Ok(false);
        };
        self.update_user_session(user_session)?;

        match self.get_client_session(client_session_id).await? {
            Some(mut client_session) => {
                client_session.detach();
                self.update_client_session(&client_session)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Builds the read-only client session view of `user_session`.
    ///
    /// References to client sessions that vanished or were detached are
    /// skipped.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails.
    pub async fn client_session_mapping(
        &self,
        user_session: &UserSession,
    ) -> SessionResult<ClientSessionMapping> {
        let mut entries = BTreeMap::new();
        for (client_id, client_session_id) in &user_session.client_sessions {
            match self.get_client_session(*client_session_id).await? {
                Some(session) if session.is_attached_to(user_session.id) => {
                    entries.insert(client_id.clone(), session);
                }
                _ => {
                    tracing::debug!(
                        "Skipping stale client session {} of user session {}",
                        client_session_id,
                        user_session.id
                    );
                }
            }
        }
        Ok(ClientSessionMapping::new(
            user_session.id,
            entries,
            Arc::clone(&self.client_sessions),
        ))
    }

    /// Restarts `user_session`: detaches all its client sessions and resets
    /// its timestamps.
    ///
    /// ## Errors
    ///
    /// Returns an error if the cache fails.
    pub async fn restart_user_session(&self, user_session: &mut UserSession) -> SessionResult<()> {
        let mut mapping = self.client_session_mapping(user_session).await?;
        mapping.on_user_session_restart()?;
        user_session.restart();
        self.update_user_session(user_session)
    }

    /// Loads a user session or fails if it is missing.
    ///
    /// ## Errors
    ///
    /// Returns [`SessionError::NotFound`] if there is no such session.
    pub async fn require_user_session(&self, id: Uuid) -> SessionResult<UserSession> {
        self.get_user_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }
}

/// Factory of [`UserSessionProvider`]s.
#[derive(Debug)]
pub struct UserSessionProviderFactory {
    backend: Arc<dyn CacheBackend>,
}

impl UserSessionProviderFactory {
    /// Provider ID.
    pub const ID: &'static str = "default";

    /// Creates a factory over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }
}

impl ProviderFactory for UserSessionProviderFactory {
    type Provider = UserSessionProvider;

    fn id(&self) -> &'static str {
        Self::ID
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: Self::ID,
            name: "User sessions",
            description: "Cache-backed user and client sessions",
            priority: 0,
        }
    }

    fn create(&self, session: &KeycloakSession) -> Result<UserSessionProvider, SpiError> {
        Ok(UserSessionProvider::new(
            Arc::clone(&self.backend),
            session.transaction_manager(),
        ))
    }
}
