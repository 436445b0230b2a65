//! # kc-cache-redis
//!
//! Redis cache backend for Keycloak Rust.
//!
//! This crate provides a remote [`kc_cache::CacheBackend`] using the `fred`
//! crate, so that several Keycloak nodes share their caches through Redis.
//!
//! ## Features
//!
//! - Reconnection with configurable exponential backoff
//! - Atomic conditional writes through server-side Lua scripts
//! - One hash tag per cache, so the scripts also run on Redis Cluster
//!
//! ## Example
//!
//! ```ignore
//! use kc_cache_redis::{RedisCacheBackend, RedisConfig};
//! use kc_cache::{CacheBackend, caches};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::new()
//!         .url("redis://localhost:6379")
//!         .key_prefix("kc");
//!
//!     let backend = RedisCacheBackend::new(config).await?;
//!
//!     backend
//!         .put(caches::ACTION_TOKENS, "abc123", "{}".into(), Some(Duration::from_secs(60)))
//!         .await?;
//!     let consumed = backend.remove(caches::ACTION_TOKENS, "abc123").await?;
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;

pub use backend::RedisCacheBackend;
pub use config::{ReconnectSettings, RedisConfig};
