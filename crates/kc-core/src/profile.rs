//! Feature profile.
//!
//! Feature flags are explicit configuration values passed to whoever needs
//! them; there is no global profile lookup.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Optional server features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    /// Fine-grained authorization services.
    Authorization,
    /// Allow rolling updates between micro releases of the same stream.
    RollingUpdatesV2,
}

impl Feature {
    /// Returns the configuration key of the feature.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::RollingUpdatesV2 => "rolling-updates-v2",
        }
    }

    /// Parses a feature from its configuration key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "authorization" => Some(Self::Authorization),
            "rolling-updates-v2" | "rolling-updates:v2" => Some(Self::RollingUpdatesV2),
            _ => None,
        }
    }
}

/// Set of enabled features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    enabled: BTreeSet<Feature>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            enabled: BTreeSet::from([Feature::Authorization]),
        }
    }
}

impl Profile {
    /// Creates a profile with no feature enabled.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            enabled: BTreeSet::new(),
        }
    }

    /// Enables a feature.
    #[must_use]
    pub fn with(mut self, feature: Feature) -> Self {
        self.enabled.insert(feature);
        self
    }

    /// Disables a feature.
    #[must_use]
    pub fn without(mut self, feature: Feature) -> Self {
        self.enabled.remove(&feature);
        self
    }

    /// Checks whether a feature is enabled.
    #[must_use]
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /// Parses a comma-separated feature list, ignoring unknown entries.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let enabled = list
            .split(',')
            .filter_map(|key| {
                let feature = Feature::from_key(key);
                if feature.is_none() && !key.trim().is_empty() {
                    tracing::warn!("Ignoring unknown feature '{}'", key.trim());
                }
                feature
            })
            .collect();
        Self { enabled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_feature_list() {
        let profile = Profile::parse("authorization, rolling-updates:v2, bogus");

        assert!(profile.is_enabled(Feature::Authorization));
        assert!(profile.is_enabled(Feature::RollingUpdatesV2));
    }

    #[test]
    fn with_and_without() {
        let profile = Profile::empty().with(Feature::RollingUpdatesV2);
        assert!(profile.is_enabled(Feature::RollingUpdatesV2));

        let profile = profile.without(Feature::RollingUpdatesV2);
        assert!(!profile.is_enabled(Feature::RollingUpdatesV2));
    }
}
