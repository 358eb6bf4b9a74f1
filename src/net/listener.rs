//! The single TCP listener shared by HTTP and WebSocket traffic.
//!
//! Admission is bounded by `listener.max_connections`: once every slot is
//! taken, `accept` stops pulling sockets and new clients queue in the
//! kernel backlog until a connection closes.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The slot semaphore was closed; no more connections will be admitted.
    #[error("listener closed")]
    Closed,
}

pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let socket = TcpListener::bind(config.bind_address())
            .await
            .map_err(ListenerError::Bind)?;

        tracing::debug!(
            address = ?socket.local_addr().ok(),
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self::from_tokio(socket, config.max_connections))
    }

    /// Wrap an already-bound socket.
    pub fn from_tokio(socket: TcpListener, max_connections: usize) -> Self {
        Self {
            socket,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free slot, then for a client.
    ///
    /// Cancel-safe: dropping the future before a client arrives gives the
    /// slot back.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
        }
        tracing::trace!(peer = %peer, free_slots = self.slots.available_permits(), "Accepted");

        Ok((stream, peer, ConnectionPermit { _slot: slot }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One admission slot; released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}
