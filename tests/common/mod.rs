//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parts_search_server::config::ServerConfig;
use parts_search_server::http::{HttpServer, ServerHandle};
use parts_search_server::realtime::NotificationHub;
use parts_search_server::search::{SearchBackend, SearchError, SearchReply, SearchRequest};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const FRONTEND_ORIGIN: &str = "http://localhost:5173";

/// In-process search backend with a few fixed routes:
/// `/parts` echoes the query and body, `/slow` sleeps, `/boom` fails,
/// `/panic` panics, anything else is a routing miss.
#[derive(Default)]
pub struct FakeSearch {
    pub calls: AtomicUsize,
}

impl FakeSearch {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for FakeSearch {
    async fn handle(&self, request: SearchRequest) -> Result<SearchReply, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match request.path.as_str() {
            "/parts" => Ok(SearchReply::ok(json!({
                "success": true,
                "query": request.query_param("query"),
                "body": request.body.as_ref().map(|b| b.to_json()),
                "requestId": request.request_id,
            }))),
            "/slow" => {
                let millis = request
                    .query_param("ms")
                    .and_then(|ms| ms.parse().ok())
                    .unwrap_or(500);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(SearchReply::ok(json!({ "success": true, "sleptMs": millis })))
            }
            "/boom" => Err(SearchError::failed("db down")),
            "/panic" => panic!("search handler exploded"),
            other => Err(SearchError::NotFound(other.to_string())),
        }
    }
}

/// A running server plus the collaborators tests poke at.
pub struct TestServer {
    pub handle: ServerHandle,
    pub search: Arc<FakeSearch>,
    pub hub: Arc<NotificationHub>,
}

impl TestServer {
    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr(), path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr(), path)
    }
}

/// Config bound to an ephemeral loopback port.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config
}

/// Start a server with the fake search backend and a fresh hub.
pub async fn start_server(config: ServerConfig) -> TestServer {
    let search = Arc::new(FakeSearch::default());
    let hub = Arc::new(NotificationHub::new());
    let server = HttpServer::new(config, search.clone(), hub.clone());
    let handle = server.bind().await.unwrap().spawn();
    TestServer { handle, search, hub }
}

/// Start a programmable upstream that answers every request with the
/// status and JSON body `f` returns.
pub async fn start_programmable_upstream<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let head = String::from_utf8_lossy(&buf[..n]).to_string();
                        let request_line = head.lines().next().unwrap_or_default().to_string();

                        let (status, body) = f(request_line).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
