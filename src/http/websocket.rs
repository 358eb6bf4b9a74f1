//! WebSocket upgrade bridge.
//!
//! # Responsibilities
//! - Detect upgrade requests from their headers
//! - Complete the handshake on the configured path
//! - Hand the upgraded socket to the real-time collaborator
//!
//! # Design Decisions
//! - Upgrade requests never enter the HTTP pipeline; the demultiplexer in
//!   `server.rs` sends them here instead
//! - Browsers always send `Origin` on WebSocket handshakes, so the CORS
//!   allow-list doubles as a cross-site hijacking guard

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, Request, State,
    },
    http::{header, HeaderMap},
    response::Response,
    routing::get,
    Router,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::{CorsConfig, ServerConfig};
use crate::http::envelope;
use crate::http::request::{RequestIdExt, X_REQUEST_ID};
use crate::realtime::{PeerInfo, RealtimeService};

/// True for HTTP/1.1 `Connection: upgrade` + `Upgrade: websocket` requests.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|proto| proto.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

#[derive(Clone)]
struct BridgeState {
    realtime: Arc<dyn RealtimeService>,
    cors: Arc<CorsConfig>,
}

/// Router that serves only upgrade requests.
pub fn build_bridge(config: &ServerConfig, realtime: Arc<dyn RealtimeService>) -> Router {
    let state = BridgeState {
        realtime,
        cors: Arc::new(config.cors.clone()),
    };

    Router::new()
        .route(&config.websocket.path, get(accept_upgrade))
        .fallback(unknown_target)
        .method_not_allowed_fallback(unknown_target)
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}

async fn accept_upgrade(
    State(state): State<BridgeState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .map(|v| v.to_str().map(str::to_owned));

    let origin = match origin {
        None => None,
        Some(Ok(origin)) if state.cors.is_allowed(&origin) => Some(origin),
        Some(other) => {
            tracing::warn!(peer = %addr, origin = ?other.ok(), "Rejected WebSocket connection: origin not allowed");
            return envelope::origin_rejected();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(peer = %addr, reason = %rejection.body_text(), "Malformed upgrade request");
            return envelope::bad_request(&rejection.body_text());
        }
    };

    let peer = PeerInfo {
        addr,
        origin,
        request_id: request.request_id(),
    };
    let realtime = state.realtime.clone();

    upgrade
        .on_failed_upgrade(move |e| {
            tracing::warn!(peer = %addr, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            realtime.on_connect(socket, peer).await;
        })
}

async fn unknown_target(request: Request) -> Response {
    tracing::debug!(path = %request.uri().path(), "Upgrade request for unknown path");
    envelope::not_found()
}
