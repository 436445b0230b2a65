//! # Keycloak Rust Server
//!
//! Main entry point for a Keycloak Rust cluster node.

#![forbid(unsafe_code)]

use kc_server::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Keycloak Rust {} starting as node {}",
        config.core.node.version,
        config.core.node.name
    );

    Server::new(config).await?.run().await
}
