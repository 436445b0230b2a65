//! # kc-cache
//!
//! Clustered cache layer for Keycloak Rust.
//!
//! Every node of a cluster talks to the same [`CacheBackend`]. On top of it
//! this crate provides:
//!
//! - [`EntryStore`] - Typed, buffered view of one cache, committed with the session
//! - [`ConditionalRemover`] - Predicates for sweeping entries
//! - [`SingleUseObjectTracker`] - Exactly-once consumption of codes and tokens
//! - [`ClusterCoordinator`] - At-most-once task execution per interval
//! - [`ClusterAwareScheduledTaskRunner`] - Periodic maintenance through the coordinator
//!
//! The embedded backend is [`InMemoryCacheBackend`]; the remote one lives in
//! `kc-cache-redis`.
//!
//! ## Example
//!
//! ```ignore
//! use kc_cache::{EntryStore, caches};
//!
//! let store = EntryStore::<UserSession>::enlisted(
//!     caches::SESSIONS,
//!     backend,
//!     session.transaction_manager(),
//! );
//! store.put(&session_id, &user_session)?;
//! session.transaction_manager().commit().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod cluster;
pub mod error;
pub mod memory;
pub mod remover;
pub mod single_use;
pub mod store;

pub use backend::{CacheBackend, VersionedValue, caches};
pub use cluster::{
    CLUSTER_SPI, ClusterAwareScheduledTaskRunner, ClusterCoordinator, ClusterProviderFactory,
    ClusterSpi, ExecutionResult, ScheduledTask, TaskError,
};
pub use error::{CacheError, CacheResult};
pub use memory::InMemoryCacheBackend;
pub use remover::{ConditionalRemover, EmptyConditionalRemover, FnConditionalRemover};
pub use single_use::{
    InMemoryRevokedTokenPersister, Notes, REVOKED_KEY, RevokedTokenPersister,
    SINGLE_USE_OBJECT_SPI, SingleUseObjectProviderFactory, SingleUseObjectSpi,
    SingleUseObjectTracker,
};
pub use store::EntryStore;
