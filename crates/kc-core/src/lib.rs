//! # kc-core
//!
//! Core utilities, configuration, and error handling for Keycloak Rust.
//!
//! This crate provides foundational types used across the cache, session
//! and authorization crates:
//!
//! - [`Config`] - node, cache and session configuration
//! - [`Profile`] - explicit feature flags
//! - [`Event`] - security events and [`EventListener`] sinks
//! - [`CompatibilityVersionChecker`] - rolling-update safety between nodes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod compatibility;
pub mod config;
pub mod error;
pub mod event;
pub mod profile;

pub use compatibility::{CompatibilityResult, CompatibilityVersionChecker, ModelVersion};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventListener, EventType};
pub use profile::{Feature, Profile};
