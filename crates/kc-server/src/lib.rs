//! # kc-server
//!
//! Cluster node process for Keycloak Rust.
//!
//! A node connects the shared cache, checks that it may join the running
//! cluster, initializes its provider factories and then runs cluster-wide
//! maintenance until it receives a shutdown signal:
//!
//! - expired user sessions are swept at most once per interval across the
//!   cluster
//! - session expiration events are delivered off the cache path
//!
//! ## Usage
//!
//! ```ignore
//! use kc_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::from_env()?;
//! let server = Server::new(config).await?;
//! server.run().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod compatibility;
pub mod config;
pub mod providers;

pub use config::ServerConfig;

use std::sync::Arc;

use kc_authz::AuthorizationStore;
use kc_cache::{CacheBackend, ClusterAwareScheduledTaskRunner, ScheduledTask};
use kc_core::event::EventListener;
use kc_session::{ExpirationEventWorker, ExpiredSessionSweep};
use kc_spi::KeycloakSessionFactory;
use tokio::task::JoinHandle;

/// A Keycloak Rust cluster node.
pub struct Server {
    config: ServerConfig,
    backend: Arc<dyn CacheBackend>,
    session_factory: Arc<KeycloakSessionFactory>,
    listener: Arc<dyn EventListener>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("node", &self.config.core.node.name)
            .field("session_factory", &self.session_factory)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a node from `config`.
    ///
    /// ## Errors
    ///
    /// Fails if the cache is unreachable, if the node is incompatible with
    /// the running cluster or if a provider factory fails to initialize.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let backend = providers::cache_backend(&config).await?;
        Self::with_backend(config, backend).await
    }

    /// Creates a node sharing an existing cache backend.
    ///
    /// ## Errors
    ///
    /// See [`Server::new`].
    pub async fn with_backend(
        config: ServerConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> anyhow::Result<Self> {
        compatibility::join_cluster(backend.as_ref(), &compatibility::checker(&config)).await?;

        let listener = providers::event_listener();
        let registry = providers::build_registry(
            &config,
            &backend,
            &Arc::new(AuthorizationStore::new()),
            Arc::clone(&listener),
        );
        let session_factory =
            KeycloakSessionFactory::initialize(Arc::new(registry), &config.provider_config())?;

        tracing::info!("Node {} initialized", config.core.node.name);
        Ok(Self {
            config,
            backend,
            session_factory,
            listener,
        })
    }

    /// Runs the node until a shutdown signal arrives.
    ///
    /// ## Errors
    ///
    /// Does not fail once the node is running.
    pub async fn run(self) -> anyhow::Result<()> {
        let tasks = self.start_maintenance();
        tracing::info!("Node {} running", self.config.core.node.name);

        shutdown_signal().await;

        for task in &tasks {
            task.abort();
        }
        self.session_factory.close();
        tracing::info!("Node shutdown complete");
        Ok(())
    }

    /// Spawns the background maintenance tasks and returns their handles.
    #[must_use]
    pub fn start_maintenance(&self) -> Vec<JoinHandle<()>> {
        let (notifier, worker) = ExpirationEventWorker::spawn(Arc::clone(&self.listener));
        let sweep = ExpiredSessionSweep::new(
            Arc::clone(&self.backend),
            self.config.core.session.idle_timeout_secs,
            self.config.core.session.max_lifespan_secs,
        )
        .with_notifier(notifier);

        let runner = Arc::new(ClusterAwareScheduledTaskRunner::new(
            Arc::clone(&self.session_factory),
            Arc::new(sweep) as Arc<dyn ScheduledTask>,
            self.config.expiration_interval(),
        ));
        vec![runner.start(), worker]
    }

    /// Returns the session factory.
    #[must_use]
    pub const fn session_factory(&self) -> &Arc<KeycloakSessionFactory> {
        &self.session_factory
    }

    /// Returns the cache backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Returns the server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Waits for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("Failed to install SIGTERM handler: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
