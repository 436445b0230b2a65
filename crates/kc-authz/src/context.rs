//! Identity and evaluation context.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

/// The subject permissions are evaluated for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Subject identifier: a user ID or a client's service account ID.
    pub id: String,
    /// Realm roles held by the subject.
    pub realm_roles: BTreeSet<String>,
    /// Client roles held by the subject, keyed by client ID.
    pub client_roles: BTreeMap<String, BTreeSet<String>>,
    /// Claims of the subject.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Identity {
    /// Creates an identity without roles or claims.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Adds realm roles.
    #[must_use]
    pub fn with_realm_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.realm_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Adds roles of `client_id`.
    #[must_use]
    pub fn with_client_roles(
        mut self,
        client_id: impl Into<String>,
        roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.client_roles
            .entry(client_id.into())
            .or_default()
            .extend(roles.into_iter().map(Into::into));
        self
    }

    /// Adds a claim value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Returns whether the subject holds a realm role.
    #[must_use]
    pub fn has_realm_role(&self, role: &str) -> bool {
        self.realm_roles.contains(role)
    }

    /// Returns whether the subject holds a role of `client_id`.
    #[must_use]
    pub fn has_client_role(&self, client_id: &str, role: &str) -> bool {
        self.client_roles
            .get(client_id)
            .is_some_and(|roles| roles.contains(role))
    }

    /// Returns whether the subject holds `role`.
    ///
    /// Client roles are written `client/role`; anything else is a realm
    /// role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        match role.split_once('/') {
            Some((client_id, role)) => self.has_client_role(client_id, role),
            None => self.has_realm_role(role),
        }
    }
}

/// Everything policies may inspect about a request.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    identity: Identity,
    client_id: Option<String>,
    attributes: BTreeMap<String, Vec<String>>,
    current_time: DateTime<Utc>,
}

/// Context attribute keys.
pub mod attributes {
    /// Client issuing the request.
    pub const CLIENT_ID: &str = "kc.client.id";
    /// Network address of the request.
    pub const CLIENT_NETWORK_IP_ADDRESS: &str = "kc.client.network.ip_address";
    /// Evaluation time in seconds since the epoch.
    pub const TIME_DATE_TIME: &str = "kc.time.date_time";
}

impl EvaluationContext {
    /// Creates a context for `identity` evaluated now.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            client_id: None,
            attributes: BTreeMap::new(),
            current_time: Utc::now(),
        }
    }

    /// Sets the requesting client.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Pins the evaluation time.
    #[must_use]
    pub const fn at(mut self, time: DateTime<Utc>) -> Self {
        self.current_time = time;
        self
    }

    /// Adds a context attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Returns the subject.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the requesting client.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the evaluation time.
    #[must_use]
    pub const fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    /// Returns all context attributes, including the derived client and
    /// time entries.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, Vec<String>> {
        let mut all = self.attributes.clone();
        if let Some(client_id) = &self.client_id {
            all.insert(attributes::CLIENT_ID.to_string(), vec![client_id.clone()]);
        }
        all.insert(
            attributes::TIME_DATE_TIME.to_string(),
            vec![self.current_time.timestamp().to_string()],
        );
        all
    }

    /// Returns the first value of a context attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes().remove(name).and_then(|values| values.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_roles_use_slash_notation() {
        let identity = Identity::new("alice")
            .with_realm_roles(["user"])
            .with_client_roles("reports", ["viewer"]);

        assert!(identity.has_role("user"));
        assert!(identity.has_role("reports/viewer"));
        assert!(!identity.has_role("reports/editor"));
        assert!(!identity.has_role("viewer"));
    }

    #[test]
    fn derived_attributes_are_exposed() {
        let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let context = EvaluationContext::new(Identity::new("alice"))
            .with_client("portal")
            .with_attribute(attributes::CLIENT_NETWORK_IP_ADDRESS, "10.0.0.1")
            .at(time);

        assert_eq!(context.attribute(attributes::CLIENT_ID).as_deref(), Some("portal"));
        assert_eq!(
            context.attribute(attributes::TIME_DATE_TIME).as_deref(),
            Some("1700000000")
        );
        assert_eq!(
            context.attribute(attributes::CLIENT_NETWORK_IP_ADDRESS).as_deref(),
            Some("10.0.0.1")
        );
    }
}
