//! # kc-session
//!
//! Session management for Keycloak Rust.
//!
//! This crate handles user sessions and client sessions stored in the
//! shared cluster cache.
//!
//! ## Components
//!
//! - [`UserSession`] / [`ClientSession`] - Session models
//! - [`UserSessionProvider`] - Cache-backed storage, enlisted in the unit of work
//! - [`ClientSessionMapping`] - Read-only client sessions of one user session
//! - [`ExpiredSessionSweep`] - Cluster-wide removal of expired sessions
//! - [`ExpirationEventWorker`] - Emits `USER_SESSION_DELETED` events off the sweep path

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client_session;
pub mod error;
pub mod expiration;
pub mod mapping;
pub mod provider;
pub mod user_session;

pub use client_session::ClientSession;
pub use error::{SessionError, SessionResult};
pub use expiration::{
    EXPIRATION_TASK, ExpirationEventWorker, ExpirationNotifier, ExpiredSession,
    ExpiredSessionSweep,
};
pub use mapping::ClientSessionMapping;
pub use provider::{USER_SESSION_SPI, UserSessionProvider, UserSessionProviderFactory, UserSessionSpi};
pub use user_session::{SessionState, UserSession};
