//! # kc-spi
//!
//! Service Provider Interface (SPI) traits for Keycloak Rust extensibility.
//!
//! This crate defines the contracts that pluggable components implement and
//! the process-wide state they are wired through.
//!
//! ## Design
//!
//! - [`Provider`] - Base trait for all provider implementations
//! - [`ProviderFactory`] - Factory trait for creating provider instances
//! - [`Spi`] - Definition of an SPI extension point
//! - [`SpiRegistry`] - Explicit typed registry, populated at startup
//! - [`KeycloakSessionFactory`] / [`KeycloakSession`] - process and request scope
//! - [`TransactionManager`] - unit of work that cache stores enlist in

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod provider;
pub mod registry;
pub mod session;
pub mod transaction;

pub use provider::{
    FactoryConfig, Provider, ProviderConfig, ProviderFactory, ProviderMetadata, Spi, SpiError,
};
pub use registry::SpiRegistry;
pub use session::{KeycloakSession, KeycloakSessionFactory};
pub use transaction::{
    AfterCompletion, AsyncResponse, KeycloakTransaction, TransactionError, TransactionManager,
    TransactionOutcome, TransactionState,
};
