//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - A bind failure is never retried
//! - Readiness is announced only after the listener is bound

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::net::listener::ListenerError;

/// Fatal errors raised before the server starts accepting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: ListenerError,
    },
}

/// Operator-facing URLs printed once the listener is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub health: String,
    pub search_example: String,
    pub websocket: String,
}

impl Endpoints {
    pub fn new(config: &ServerConfig, addr: SocketAddr) -> Self {
        // Wildcard binds are reachable on loopback.
        let host = if addr.ip().is_unspecified() {
            "localhost".to_string()
        } else {
            addr.ip().to_string()
        };
        let port = addr.port();
        Self {
            health: format!("http://{}:{}/api/health", host, port),
            search_example: format!(
                "http://{}:{}{}/parts?query=532416954",
                host, port, config.search.prefix
            ),
            websocket: format!("ws://{}:{}{}", host, port, config.websocket.path),
        }
    }
}

/// Log readiness for operators.
pub fn announce_ready(config: &ServerConfig, addr: SocketAddr) {
    let endpoints = Endpoints::new(config, addr);
    tracing::info!(
        port = addr.port(),
        environment = %config.service.environment,
        "Server running on port {}",
        addr.port()
    );
    tracing::info!(url = %endpoints.health, "Health check");
    tracing::info!(url = %endpoints.search_example, "API");
    tracing::info!(url = %endpoints.websocket, "WebSocket");
}
