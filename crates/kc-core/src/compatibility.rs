//! Rolling-update compatibility between cluster nodes.
//!
//! Each node publishes a metadata map (currently only its version). A node
//! joining a running cluster compares the metadata of the running nodes with
//! its own before serving traffic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{Feature, Profile};

/// Metadata key holding the node version.
pub const VERSION_KEY: &str = "version";

/// Provider id reported in compatibility results.
pub const PROVIDER_ID: &str = "keycloak";

/// Error returned when a version string is not `major.minor.micro`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid model version: '{0}'")]
pub struct VersionParseError(pub String);

/// A `major.minor.micro` version triple.
///
/// Trailing qualifiers (`26.0.3-SNAPSHOT`, `26.0.3.Final`) are accepted and
/// ignored for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Micro version.
    pub micro: u32,
}

impl ModelVersion {
    /// Creates a version triple.
    #[must_use]
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Checks whether both versions belong to the same release stream.
    #[must_use]
    pub const fn has_same_major_minor(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for ModelVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let numeric: &str = s
            .split(|c: char| c == '-' || c == '_')
            .next()
            .unwrap_or_default();

        let mut parts = numeric.split('.');
        let mut next = |required: bool| -> Result<u32, VersionParseError> {
            match parts.next() {
                Some(part) => part
                    .parse()
                    .map_err(|_| VersionParseError(s.to_string())),
                None if required => Err(VersionParseError(s.to_string())),
                None => Ok(0),
            }
        };

        let major = next(true)?;
        let minor = next(false)?;
        let micro = next(false)?;
        // anything after micro is a qualifier (e.g. `.Final`)

        Ok(Self::new(major, minor, micro))
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// A metadata attribute whose value differs between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMismatch {
    /// Attribute name.
    pub name: String,
    /// Value on this node.
    pub local: Option<String>,
    /// Value on the other node.
    pub remote: Option<String>,
}

/// Outcome of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatibilityResult {
    /// Metadata is identical.
    AllEqual,
    /// Metadata differs, but the provider accepts the difference.
    ProviderCompatible {
        /// Provider that accepted the difference.
        provider_id: String,
    },
    /// Nodes must not run side by side.
    Incompatible {
        /// Provider that rejected the combination.
        provider_id: String,
        /// Attributes that differ.
        attributes: Vec<AttributeMismatch>,
    },
}

impl CompatibilityResult {
    /// Returns whether both nodes may run in the same cluster.
    #[must_use]
    pub const fn is_compatible(&self) -> bool {
        !matches!(self, Self::Incompatible { .. })
    }

    /// Returns the names of the mismatching attributes, if incompatible.
    #[must_use]
    pub fn incompatible_attributes(&self) -> Option<Vec<&str>> {
        match self {
            Self::Incompatible { attributes, .. } => {
                Some(attributes.iter().map(|a| a.name.as_str()).collect())
            }
            _ => None,
        }
    }
}

/// Checks whether metadata published by another node is compatible with ours.
#[derive(Debug, Clone)]
pub struct CompatibilityVersionChecker {
    metadata: BTreeMap<String, String>,
    rolling_updates: bool,
}

impl CompatibilityVersionChecker {
    /// Creates a checker for a node running `version`.
    #[must_use]
    pub fn new(version: impl Into<String>, profile: &Profile) -> Self {
        Self {
            metadata: BTreeMap::from([(VERSION_KEY.to_string(), version.into())]),
            rolling_updates: profile.is_enabled(Feature::RollingUpdatesV2),
        }
    }

    /// Adds a metadata attribute that must match exactly.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Returns the metadata this node publishes.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Compares the metadata of another node with ours.
    #[must_use]
    pub fn is_compatible(&self, remote: &BTreeMap<String, String>) -> CompatibilityResult {
        let equal_comparison = self.exact_comparison(remote);

        if equal_comparison.is_compatible() || !self.rolling_updates {
            return equal_comparison;
        }

        let Some(remote_version) = remote.get(VERSION_KEY) else {
            return equal_comparison;
        };

        // another mismatching attribute rules out a rolling update
        let only_version = equal_comparison
            .incompatible_attributes()
            .is_some_and(|names| names == [VERSION_KEY]);
        if !only_version {
            return equal_comparison;
        }

        let (Ok(remote_version), Some(Ok(local_version))) = (
            remote_version.parse::<ModelVersion>(),
            self.metadata.get(VERSION_KEY).map(|v| v.parse::<ModelVersion>()),
        ) else {
            tracing::debug!("Unparseable version in compatibility metadata");
            return equal_comparison;
        };

        if !local_version.has_same_major_minor(&remote_version) {
            return equal_comparison;
        }

        // never allow a rolling downgrade
        if local_version.micro < remote_version.micro {
            return equal_comparison;
        }

        CompatibilityResult::ProviderCompatible {
            provider_id: PROVIDER_ID.to_string(),
        }
    }

    fn exact_comparison(&self, remote: &BTreeMap<String, String>) -> CompatibilityResult {
        let mut names: Vec<&String> = self.metadata.keys().chain(remote.keys()).collect();
        names.sort();
        names.dedup();

        let attributes: Vec<AttributeMismatch> = names
            .into_iter()
            .filter(|name| self.metadata.get(*name) != remote.get(*name))
            .map(|name| AttributeMismatch {
                name: name.clone(),
                local: self.metadata.get(name).cloned(),
                remote: remote.get(name).cloned(),
            })
            .collect();

        if attributes.is_empty() {
            CompatibilityResult::AllEqual
        } else {
            CompatibilityResult::Incompatible {
                provider_id: PROVIDER_ID.to_string(),
                attributes,
            }
        }
    }
}
