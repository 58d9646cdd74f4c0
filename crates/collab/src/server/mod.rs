//! WebSocket transport for the collaboration engine.
//!
//! This module is only available when the `server` feature is enabled.
//! It owns nothing of the engine's semantics: sockets are accepted,
//! envelopes are decoded once at the boundary, and everything else is a
//! call into [`SessionManager`]. Each connection runs in its own task;
//! a periodic sweeper task reaps idle sessions.
//!
//! # Example
//!
//! ```ignore
//! use collab::manager::{ManagerConfig, SessionManager};
//! use collab::server::{CollabServer, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), collab::server::ServerError> {
//!     let manager = Arc::new(SessionManager::new(ManagerConfig::default()));
//!     let server = CollabServer::new(ServerConfig::with_port(8080), manager);
//!     server.run().await
//! }
//! ```

pub mod connection;
pub mod message;

pub use connection::handle_connection;
pub use message::{ClientEnvelope, ClientIdentity, ServerEnvelope};

use crate::manager::SessionManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum concurrently open connections.
    pub max_total_connections: usize,
    /// How long a fresh socket may sit silent before the handshake is
    /// abandoned.
    pub hello_timeout_secs: u64,
    /// Interval between idle-session sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_total_connections: 1000,
            hello_timeout_secs: 10,
            cleanup_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with the specified port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// The full bind address.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// The WebSocket collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    manager: Arc<SessionManager>,
}

impl CollabServer {
    pub fn new(config: ServerConfig, manager: Arc<SessionManager>) -> Self {
        Self { config, manager }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Accept connections forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        info!(address = %self.config.socket_addr(), "collaboration server listening");

        let sweeper = {
            let manager = Arc::clone(&self.manager);
            let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let reaped = manager.cleanup_sessions().await;
                    if !reaped.is_empty() {
                        debug!(count = reaped.len(), "reaped idle sessions");
                    }
                }
            })
        };

        let connections = Arc::new(AtomicUsize::new(0));
        let hello_timeout = Duration::from_secs(self.config.hello_timeout_secs.max(1));
        let result = loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => break Err(ServerError::Io(err)),
            };
            if connections.load(Ordering::Relaxed) >= self.config.max_total_connections {
                warn!(%peer, "connection limit reached, refusing socket");
                drop(stream);
                continue;
            }
            connections.fetch_add(1, Ordering::Relaxed);
            debug!(%peer, "accepted connection");

            let manager = Arc::clone(&self.manager);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, manager, hello_timeout).await {
                    debug!(%peer, error = %err, "connection ended with error");
                }
                connections.fetch_sub(1, Ordering::Relaxed);
            });
        };
        sweeper.abort();
        result
    }
}
