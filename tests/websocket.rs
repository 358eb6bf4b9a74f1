//! WebSocket bridge and notification hub over the shared listener.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parts_search_server::http::HttpServer;
use parts_search_server::realtime::NotificationHub;
use parts_search_server::search::UpstreamSearch;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

mod common;

use common::{eventually, start_programmable_upstream, start_server, test_config, FRONTEND_ORIGIN};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn welcome_ping_and_events_share_the_http_port() {
    let server = start_server(test_config()).await;

    let (mut ws, response) = connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "connected");
    assert!(welcome["clientId"].is_string());

    ws.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({ "type": "pong" }));

    ws.send(Message::text(r#"{"type":"subscribe"}"#)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "error");

    // Plain HTTP keeps working on the same port while the socket is open.
    let res = reqwest::get(server.url("/api/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert!(eventually(Duration::from_secs(2), || server.hub.client_count() == 1).await);
    assert_eq!(server.hub.publish("catalog.updated", json!({ "parts": 3 })), 1);
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "event", "topic": "catalog.updated", "data": { "parts": 3 } })
    );

    ws.close(None).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || server.hub.client_count() == 0).await);

    server.handle.shutdown();
    server.handle.wait().await.unwrap();
}

#[tokio::test]
async fn allowed_origin_may_connect() {
    let server = start_server(test_config()).await;

    let mut request = server.ws_url("/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", FRONTEND_ORIGIN.parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "connected");

    server.handle.shutdown();
}

#[tokio::test]
async fn foreign_origin_is_refused() {
    let server = start_server(test_config()).await;

    let mut request = server.ws_url("/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "http://evil.example".parse().unwrap());

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        other => panic!("expected a 403 handshake failure, got {:?}", other.map(|(_, r)| r.status())),
    }
    assert_eq!(server.hub.client_count(), 0);

    server.handle.shutdown();
}

#[tokio::test]
async fn upgrade_on_unknown_path_is_not_found() {
    let server = start_server(test_config()).await;

    for path in ["/socket", "/api/health"] {
        match connect_async(server.ws_url(path)).await {
            Err(WsError::Http(response)) => {
                assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path)
            }
            other => panic!("expected a 404 for {}, got {:?}", path, other.map(|(_, r)| r.status())),
        }
    }

    server.handle.shutdown();
}

#[tokio::test]
async fn sessions_are_closed_when_the_server_drains() {
    let server = start_server(test_config()).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "connected");

    server.handle.shutdown();

    let close = loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => break frame,
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected a close frame, got {:?}", other),
        }
    };
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Away));

    tokio::time::timeout(Duration::from_secs(5), server.handle.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn completed_searches_are_pushed_to_clients() {
    let upstream = start_programmable_upstream(|_| async {
        (200, r#"{"success":true,"results":[]}"#.to_string())
    })
    .await;

    let config = test_config();
    let hub = Arc::new(NotificationHub::new());
    let search = UpstreamSearch::new(&format!("http://{}", upstream), config.search.clone())
        .unwrap()
        .with_notifier(hub.clone());
    let handle = HttpServer::new(config, Arc::new(search), hub.clone())
        .bind()
        .await
        .unwrap()
        .spawn();
    let addr = handle.local_addr();

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "connected");
    assert!(eventually(Duration::from_secs(2), || hub.client_count() == 1).await);

    let res = reqwest::get(format!("http://{}/api/search/parts?query=532416954", addr))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let event = next_json(&mut ws).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["topic"], "search.completed");
    assert_eq!(event["data"]["path"], "/parts");
    assert_eq!(event["data"]["query"], "532416954");
    assert_eq!(event["data"]["status"], 200);

    handle.shutdown();
    handle.wait().await.unwrap();
}

/// Reads until the server ends the session. `false` if it stays open.
async fn ends_within(ws: &mut Client, limit: Duration) -> bool {
    let read_to_end = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    };
    tokio::time::timeout(limit, read_to_end).await.is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handshake_racing_a_drain_never_outlives_it() {
    for round in 0..40u64 {
        let server = start_server(test_config()).await;
        let url = server.ws_url("/ws");
        let connecting = tokio::spawn(async move { connect_async(url).await });

        // Vary the overlap so the drain lands on both sides of registration.
        tokio::time::sleep(Duration::from_micros(100 * (round % 8))).await;
        server.handle.shutdown();

        // A refused handshake is fine; an accepted one must be closed.
        if let Ok(Ok((mut ws, _))) = connecting.await {
            assert!(
                ends_within(&mut ws, Duration::from_secs(3)).await,
                "session accepted during drain stayed open (round {})",
                round
            );
        }
        assert!(eventually(Duration::from_secs(2), || server.hub.client_count() == 0).await);

        tokio::time::timeout(Duration::from_secs(5), server.handle.wait())
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn a_session_that_stops_reading_is_disconnected() {
    let server = start_server(test_config()).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "connected");
    assert!(eventually(Duration::from_secs(2), || server.hub.client_count() == 1).await);

    // Large events fill the socket buffers and then the session queue.
    let payload = "x".repeat(256 * 1024);
    let evicted = eventually(Duration::from_secs(10), || {
        server.hub.publish("catalog.updated", json!({ "blob": payload }));
        server.hub.client_count() == 0
    })
    .await;
    assert!(evicted, "a client that never reads should be dropped");

    server.handle.shutdown();
    drop(ws);
}
