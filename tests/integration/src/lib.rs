//! # kc-integration-tests
//!
//! Fixtures for end-to-end tests: several cluster nodes sharing one cache
//! backend, as they would share a Redis instance in production.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::sync::Arc;

use kc_cache::{CacheBackend, InMemoryCacheBackend};
use kc_server::{Server, ServerConfig};

/// Nodes sharing one cache backend.
#[derive(Debug)]
pub struct TestCluster {
    backend: Arc<dyn CacheBackend>,
    nodes: Vec<Server>,
}

impl TestCluster {
    /// Starts `size` nodes named `node-0`, `node-1`, ...
    ///
    /// ## Errors
    ///
    /// Returns an error if a node fails to join.
    pub async fn start(size: usize) -> anyhow::Result<Self> {
        Self::start_with(size, |_| {}).await
    }

    /// Starts `size` nodes, letting `configure` adjust each configuration.
    ///
    /// ## Errors
    ///
    /// Returns an error if a node fails to join.
    pub async fn start_with(
        size: usize,
        configure: impl Fn(&mut ServerConfig),
    ) -> anyhow::Result<Self> {
        init_tracing();

        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let mut nodes = Vec::with_capacity(size);
        for index in 0..size {
            let mut config = ServerConfig::for_testing(&format!("node-{index}"));
            configure(&mut config);
            nodes.push(Server::with_backend(config, Arc::clone(&backend)).await?);
        }
        Ok(Self { backend, nodes })
    }

    /// Returns the node at `index`.
    ///
    /// ## Panics
    ///
    /// Panics if there is no such node.
    #[must_use]
    pub fn node(&self, index: usize) -> &Server {
        &self.nodes[index]
    }

    /// Returns all nodes.
    #[must_use]
    pub fn nodes(&self) -> &[Server] {
        &self.nodes
    }

    /// Returns the shared cache backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kc_cache=debug,kc_session=debug,kc_authz=debug,kc_server=debug")
        .with_test_writer()
        .try_init();
}
