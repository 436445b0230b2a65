//! User session (SSO session) model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a user session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Session is active and valid.
    #[default]
    Active,
    /// Session is logged out but not yet expired.
    LoggedOut,
}

/// A user session (SSO session).
///
/// Represents an authenticated user's session across multiple clients.
/// The client sessions themselves live in their own cache; the user session
/// only records which client session belongs to which client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    // === Identity ===
    /// Unique session identifier.
    pub id: Uuid,
    /// Realm this session belongs to.
    pub realm_id: Uuid,
    /// User who owns this session.
    pub user_id: Uuid,

    // === Session State ===
    /// Current state of the session.
    pub state: SessionState,

    // === Timestamps ===
    /// When the session was created or last restarted.
    pub started_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub last_activity: DateTime<Utc>,

    // === Client Sessions ===
    /// Client session ID per client ID.
    #[serde(default)]
    pub client_sessions: BTreeMap<String, Uuid>,
}

impl UserSession {
    /// Creates a new user session.
    #[must_use]
    pub fn new(realm_id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            realm_id,
            user_id,
            state: SessionState::Active,
            started_at: now,
            last_activity: now,
            client_sessions: BTreeMap::new(),
        }
    }

    /// Updates the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Checks if the session is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active)
    }

    /// Checks if the session has expired at `now`.
    ///
    /// ## Arguments
    ///
    /// * `idle_timeout` - Maximum idle time in seconds
    /// * `max_lifespan` - Maximum session lifespan in seconds
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, idle_timeout: i64, max_lifespan: i64) -> bool {
        let idle_seconds = (now - self.last_activity).num_seconds();
        let age_seconds = (now - self.started_at).num_seconds();
        idle_seconds > idle_timeout || age_seconds > max_lifespan
    }

    /// Checks if the session has expired based on timeouts.
    #[must_use]
    pub fn is_expired(&self, idle_timeout: i64, max_lifespan: i64) -> bool {
        self.is_expired_at(Utc::now(), idle_timeout, max_lifespan)
    }

    /// Marks the session as logged out.
    pub const fn logout(&mut self) {
        self.state = SessionState::LoggedOut;
    }

    /// Resets the session for a fresh authentication of the same user.
    ///
    /// Client sessions are forgotten; detaching them in their cache is the
    /// job of [`crate::ClientSessionMapping::on_user_session_restart`].
    pub fn restart(&mut self) {
        let now = Utc::now();
        self.state = SessionState::Active;
        self.started_at = now;
        self.last_activity = now;
        self.client_sessions.clear();
    }
}
