//! Event records for security-relevant session and authorization activity.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// User session removed (logout, expiration, admin action).
    UserSessionDeleted,
    /// Authorization permission evaluated.
    PermissionEvaluated,
}

/// Outcome of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Failure,
}

/// Well-known detail keys.
pub mod details {
    /// Why something happened.
    pub const REASON: &str = "reason";
    /// Reason value for sessions removed by expiration.
    pub const USER_SESSION_EXPIRED_REASON: &str = "expired";
}

/// A security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: EventType,
    /// Outcome of the event.
    pub outcome: EventOutcome,
    /// Realm where the event occurred.
    pub realm_id: Option<Uuid>,
    /// User associated with the event.
    pub user_id: Option<Uuid>,
    /// Client associated with the event.
    pub client_id: Option<String>,
    /// Session associated with the event.
    pub session_id: Option<String>,
    /// Error message (for failure events).
    pub error: Option<String>,
    /// Additional details as key-value pairs.
    pub details: Vec<(String, String)>,
}

impl Event {
    /// Creates a new event builder.
    #[must_use]
    pub const fn builder(event_type: EventType) -> EventBuilder {
        EventBuilder::new(event_type)
    }

    /// Looks up a detail value.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Builder for creating events.
pub struct EventBuilder {
    event_type: EventType,
    outcome: EventOutcome,
    realm_id: Option<Uuid>,
    user_id: Option<Uuid>,
    client_id: Option<String>,
    session_id: Option<String>,
    error: Option<String>,
    details: Vec<(String, String)>,
}

impl EventBuilder {
    /// Creates a new event builder.
    #[must_use]
    pub const fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            outcome: EventOutcome::Success,
            realm_id: None,
            user_id: None,
            client_id: None,
            session_id: None,
            error: None,
            details: Vec::new(),
        }
    }

    /// Sets the outcome to failure with an error message.
    #[must_use]
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.outcome = EventOutcome::Failure;
        self.error = Some(error.into());
        self
    }

    /// Sets the realm ID.
    #[must_use]
    pub const fn realm(mut self, realm_id: Uuid) -> Self {
        self.realm_id = Some(realm_id);
        self
    }

    /// Sets the user ID.
    #[must_use]
    pub const fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the client ID.
    #[must_use]
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the session ID.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds a detail key-value pair.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Builds the event.
    #[must_use]
    pub fn build(self) -> Event {
        Event {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            event_type: self.event_type,
            outcome: self.outcome,
            realm_id: self.realm_id,
            user_id: self.user_id,
            client_id: self.client_id,
            session_id: self.session_id,
            error: self.error,
            details: self.details,
        }
    }
}

/// Receives events.
///
/// Listeners are invoked on worker tasks, never on cache callback paths, so
/// implementations may block on I/O.
pub trait EventListener: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &Event);
}

/// Event listener that writes to the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventListener;

impl EventListener for TracingEventListener {
    fn on_event(&self, event: &Event) {
        tracing::info!(
            event_id = %event.id,
            event_type = ?event.event_type,
            outcome = ?event.outcome,
            realm_id = ?event.realm_id,
            user_id = ?event.user_id,
            session_id = ?event.session_id,
            error = ?event.error,
            "event"
        );
    }
}

/// Event listener that keeps events in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventListener {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventListener {
    /// Creates an empty listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all received events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }
}

impl EventListener for InMemoryEventListener {
    fn on_event(&self, event: &Event) {
        self.events.write().push(event.clone());
    }
}
