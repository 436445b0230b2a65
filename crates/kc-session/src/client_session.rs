//! Client session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client session within a user session.
///
/// Represents the authentication state between a user and a specific client.
/// A client session is attached to exactly one user session until it is
/// detached, after which it no longer references any user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSession {
    // === Identity ===
    /// Unique client session identifier.
    pub id: Uuid,
    /// Parent user session ID, `None` once detached.
    pub user_session_id: Option<Uuid>,
    /// Client ID.
    pub client_id: String,
    /// Realm ID.
    pub realm_id: Uuid,
    /// Whether the session was detached from its user session.
    #[serde(default)]
    pub detached: bool,

    // === Timestamps ===
    /// When the client session was created.
    pub created_at: DateTime<Utc>,

    // === Protocol Info ===
    /// Protocol used (openid-connect, saml).
    pub protocol: String,
    /// Action being performed (if any).
    pub action: Option<String>,
}

impl ClientSession {
    /// Creates a new client session attached to `user_session_id`.
    #[must_use]
    pub fn new(
        user_session_id: Uuid,
        client_id: impl Into<String>,
        realm_id: Uuid,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_session_id: Some(user_session_id),
            client_id: client_id.into(),
            realm_id,
            detached: false,
            created_at: Utc::now(),
            protocol: protocol.into(),
            action: None,
        }
    }

    /// Returns whether this session belongs to `user_session_id`.
    #[must_use]
    pub fn is_attached_to(&self, user_session_id: Uuid) -> bool {
        !self.detached && self.user_session_id == Some(user_session_id)
    }

    /// Detaches the session from its user session.
    pub fn detach(&mut self) {
        self.detached = true;
        self.user_session_id = None;
        self.action = None;
    }
}
