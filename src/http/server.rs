//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Assemble the HTTP pipeline and the WebSocket bridge before binding
//! - Bind the single listener and announce readiness
//! - Accept connections and serve HTTP/1.1 and HTTP/2 with upgrade support
//! - Demultiplex every request: upgrades to the bridge, the rest to the pipeline
//! - Drain in-flight connections on shutdown
//!
//! # Data Flow
//! ```text
//! TcpListener (net::Listener, bounded)
//!     → hyper-util auto connection (one task per connection)
//!     → ProtocolRouter::dispatch
//!         ├─ Upgrade: websocket → bridge (http::websocket)
//!         └─ anything else      → pipeline (http::pipeline)
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
    response::Response,
    Router,
};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder, graceful::GracefulShutdown},
};
use tokio::task::{JoinError, JoinHandle};
use tower::ServiceExt;

use crate::config::ServerConfig;
use crate::http::pipeline::build_pipeline;
use crate::http::websocket::{build_bridge, is_websocket_upgrade};
use crate::lifecycle::{startup, Lifecycle, LifecycleState, Shutdown, StartupError};
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::realtime::RealtimeService;
use crate::search::SearchBackend;

/// Pause after a failed `accept` (e.g. EMFILE) before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Which side of the server a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
}

impl Protocol {
    pub fn classify(headers: &HeaderMap) -> Self {
        if is_websocket_upgrade(headers) {
            Protocol::WebSocket
        } else {
            Protocol::Http
        }
    }
}

/// Two-way branch between the HTTP pipeline and the upgrade bridge.
///
/// Exactly one of the two routers sees a given request, so only one of
/// them can finalize it.
#[derive(Clone)]
pub struct ProtocolRouter {
    pipeline: Router,
    bridge: Router,
}

impl ProtocolRouter {
    pub fn new(pipeline: Router, bridge: Router) -> Self {
        Self { pipeline, bridge }
    }

    pub async fn dispatch(&self, mut request: Request<Body>, peer: SocketAddr) -> Response {
        request.extensions_mut().insert(ConnectInfo(peer));

        let target = match Protocol::classify(request.headers()) {
            Protocol::Http => self.pipeline.clone(),
            Protocol::WebSocket => self.bridge.clone(),
        };

        match target.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

/// A server in the `starting` state: pipeline and bridge attached, nothing bound.
pub struct HttpServer {
    config: Arc<ServerConfig>,
    router: ProtocolRouter,
    realtime: Arc<dyn RealtimeService>,
    lifecycle: Lifecycle,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Assemble the server. The bridge exists before any listener does, so
    /// no upgrade can arrive ahead of it.
    pub fn new(
        config: ServerConfig,
        search: Arc<dyn SearchBackend>,
        realtime: Arc<dyn RealtimeService>,
    ) -> Self {
        let pipeline = build_pipeline(&config, search);
        let bridge = build_bridge(&config, realtime.clone());

        tracing::debug!(
            search_prefix = %config.search.prefix,
            websocket_path = %config.websocket.path,
            environment = %config.service.environment,
            "Pipeline and WebSocket bridge assembled"
        );

        Self {
            config: Arc::new(config),
            router: ProtocolRouter::new(pipeline, bridge),
            realtime,
            lifecycle: Lifecycle::new(),
            shutdown: Shutdown::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Latch that starts the drain when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Bind the listener and move to `accepting`. Bind failures are fatal
    /// and not retried.
    pub async fn bind(self) -> Result<BoundServer, StartupError> {
        let address = self.config.listener.bind_address();

        let bound = Listener::bind(&self.config.listener)
            .await
            .and_then(|listener| {
                let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
                Ok((listener, local_addr))
            });

        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                tracing::error!(address = %address, error = %source, "Failed to bind listener");
                self.lifecycle.advance(LifecycleState::Stopped);
                return Err(StartupError::Bind { address, source });
            }
        };

        self.lifecycle.advance(LifecycleState::Accepting);
        startup::announce_ready(&self.config, local_addr);

        Ok(BoundServer {
            server: self,
            listener,
            local_addr,
        })
    }
}

/// A server whose listener is bound.
pub struct BoundServer {
    server: HttpServer,
    listener: Listener,
    local_addr: SocketAddr,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.server.shutdown.clone()
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> ServerHandle {
        let handle = ServerHandle {
            local_addr: self.local_addr,
            shutdown: self.server.shutdown.clone(),
            lifecycle: self.server.lifecycle.clone(),
            tracker: self.server.tracker.clone(),
            task: None,
        };
        let task = tokio::spawn(self.run());
        ServerHandle {
            task: Some(task),
            ..handle
        }
    }

    /// Accept until shutdown fires, then drain and stop.
    pub async fn run(self) {
        let BoundServer {
            server,
            listener,
            local_addr,
        } = self;
        let HttpServer {
            config,
            router,
            realtime,
            lifecycle,
            shutdown,
            tracker,
        } = server;

        let builder = Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();

        let stop = shutdown.triggered();
        tokio::pin!(stop);

        loop {
            let accepted = tokio::select! {
                biased;
                _ = &mut stop => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(connection) => connection,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let guard = tracker.track(peer, permit);
            let router = router.clone();
            let service = service_fn(move |request: Request<Incoming>| {
                let router = router.clone();
                async move { Ok::<_, Infallible>(router.dispatch(request.map(Body::new), peer).await) }
            });

            let connection = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .into_owned();
            let connection = graceful.watch(connection);

            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer = %guard.peer(),
                        error = %e,
                        "Connection ended with error"
                    );
                }
                drop(guard);
            });
        }

        // Closing the socket first means nobody observing `draining` can
        // still get a connection accepted.
        drop(listener);
        lifecycle.advance(LifecycleState::Draining);
        tracing::info!(
            address = %local_addr,
            in_flight = tracker.active_count(),
            "Closing HTTP server"
        );

        realtime.shutdown().await;

        match tokio::time::timeout(config.timeouts.drain(), graceful.shutdown()).await {
            Ok(()) => tracing::info!("HTTP server closed"),
            Err(_) => tracing::warn!(
                abandoned = tracker.active_count(),
                "Drain deadline elapsed with connections still open"
            ),
        }

        lifecycle.advance(LifecycleState::Stopped);
    }
}

/// Control handle for a spawned server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    lifecycle: Lifecycle,
    tracker: ConnectionTracker,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Latch that starts the drain when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Start draining. Returns `false` if shutdown was already requested.
    pub fn shutdown(&self) -> bool {
        self.shutdown.trigger()
    }

    /// Wait for the server task to reach `stopped`.
    pub async fn wait(mut self) -> Result<(), JoinError> {
        match self.task.take() {
            Some(task) => task.await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::NotificationHub;
    use crate::search::UnconfiguredSearch;
    use axum::http::{header, StatusCode};

    fn router() -> ProtocolRouter {
        let config = ServerConfig::default();
        let pipeline = build_pipeline(&config, Arc::new(UnconfiguredSearch));
        let bridge = build_bridge(&config, Arc::new(NotificationHub::new()));
        ProtocolRouter::new(pipeline, bridge)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn plain_requests_go_to_the_pipeline() {
        let request = Request::get("/api/health").body(Body::empty()).unwrap();
        let response = router().dispatch(request, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upgrade_requests_never_reach_the_pipeline() {
        // `/api/health` exists in the pipeline but not in the bridge.
        let request = Request::get("/api/health")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        let response = router().dispatch(request, peer()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upgrade_without_hyper_support_is_a_bad_request() {
        // Built by hand, so hyper never attached an upgrade handle.
        let request = Request::get("/ws")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let response = router().dispatch(request, peer()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn shutdown_right_after_spawn_reaches_stopped() {
        let mut config = ServerConfig::default();
        config.listener.host = "127.0.0.1".into();
        config.listener.port = 0;
        let server = HttpServer::new(config, Arc::new(UnconfiguredSearch), Arc::new(NotificationHub::new()));
        let lifecycle = server.lifecycle();
        assert_eq!(lifecycle.current(), LifecycleState::Starting);

        let bound = server.bind().await.unwrap();
        assert_eq!(lifecycle.current(), LifecycleState::Accepting);

        let handle = bound.spawn();
        assert!(handle.shutdown());
        assert!(!handle.shutdown());
        handle.wait().await.unwrap();
        assert_eq!(lifecycle.current(), LifecycleState::Stopped);
    }
}
