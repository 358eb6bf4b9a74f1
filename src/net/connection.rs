//! Per-connection bookkeeping.
//!
//! Every accepted socket gets a [`ConnectionGuard`] that owns its slot in
//! the listener's limit and keeps the live count honest, even if the
//! connection task panics.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::net::listener::ConnectionPermit;
use crate::observability::metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, rendered as `conn-<n>` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Live-connection counter shared by the accept loop and server handles.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    live: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted socket. The slot and the count are released
    /// when the returned guard drops.
    pub fn track(&self, peer: SocketAddr, permit: ConnectionPermit) -> ConnectionGuard {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(live);

        let id = ConnectionId::next();
        tracing::trace!(connection_id = %id, peer = %peer, live, "Connection opened");

        ConnectionGuard {
            id,
            peer,
            opened_at: Instant::now(),
            live: Arc::clone(&self.live),
            _permit: permit,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }
}

/// One open connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    peer: SocketAddr,
    opened_at: Instant,
    live: Arc<AtomicU64>,
    _permit: ConnectionPermit,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(live);
        tracing::trace!(
            connection_id = %self.id,
            peer = %self.peer,
            open_for = ?self.opened_at.elapsed(),
            live,
            "Connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::net::Listener;
    use tokio::net::TcpStream;

    async fn accepted(listener: &Listener) -> (SocketAddr, ConnectionPermit) {
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (_stream, peer, permit) = listener.accept().await.unwrap();
        (peer, permit)
    }

    #[tokio::test]
    async fn guards_count_and_release_slots() {
        let listener = Listener::bind(&ListenerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 4,
        })
        .await
        .unwrap();
        let tracker = ConnectionTracker::new();

        let (peer, permit) = accepted(&listener).await;
        let first = tracker.track(peer, permit);
        let (peer, permit) = accepted(&listener).await;
        let second = tracker.track(peer, permit);

        assert_eq!(tracker.active_count(), 2);
        assert_eq!(listener.available_permits(), 2);
        assert!(second.id() > first.id());
        assert_eq!(first.peer().ip(), peer.ip());

        drop(first);
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(listener.available_permits(), 3);

        drop(second);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(listener.available_permits(), 4);
    }

    #[test]
    fn ids_render_for_logs() {
        let id = ConnectionId::next();
        assert_eq!(id.to_string(), format!("conn-{}", id.as_u64()));
    }
}
