//! Real-time collaborator seam.
//!
//! # Data Flow
//! ```text
//! Upgrade request (http::websocket bridge)
//!     → handshake completed by axum
//!     → RealtimeService::on_connect(socket, peer)
//!     → collaborator owns the session until it ends
//!
//! Drain (http::server):
//!     → RealtimeService::shutdown (close open sessions)
//! ```

pub mod hub;
pub mod message;

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::WebSocket;

pub use hub::NotificationHub;
pub use message::{ClientMessage, ServerMessage};

/// Who is on the other end of an upgraded connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub origin: Option<String>,
    pub request_id: Option<String>,
}

/// The external real-time collaborator.
#[async_trait]
pub trait RealtimeService: Send + Sync + 'static {
    /// Own `socket` until the session ends.
    async fn on_connect(&self, socket: WebSocket, peer: PeerInfo);

    /// Called once when the server starts draining.
    async fn shutdown(&self) {}
}
