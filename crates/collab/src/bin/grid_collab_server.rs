//! Standalone collaboration server.
//!
//! Configuration comes from the environment:
//! `GRID_COLLAB_BIND` (default `0.0.0.0`), `GRID_COLLAB_PORT` (default
//! `8080`), and `RUST_LOG` for the tracing filter.

use anyhow::Context;
use collab::manager::{ManagerConfig, SessionManager};
use collab::server::{CollabServer, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::default();
    if let Ok(bind) = std::env::var("GRID_COLLAB_BIND") {
        config.bind_address = bind;
    }
    if let Ok(port) = std::env::var("GRID_COLLAB_PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("invalid GRID_COLLAB_PORT: {}", port))?;
    }

    let manager = Arc::new(SessionManager::new(ManagerConfig::default()));
    let server = CollabServer::new(config, manager);
    server.run().await.context("server terminated")
}
