//! Default real-time collaborator: a broadcast hub for push notifications.
//!
//! Each session gets a writer task fed by a bounded queue; the reader runs
//! on the upgrade task. The registry maps client IDs to their queue so
//! `publish` never touches a socket directly.
//!
//! # Design Decisions
//! - A client whose queue is full is disconnected, not waited on
//! - Every session watches the hub's closing flag, so a session that
//!   registers while the hub shuts down still gets its "going away" frame

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::observability::metrics;
use crate::realtime::message::{ClientMessage, ServerMessage};
use crate::realtime::{PeerInfo, RealtimeService};

/// Frames a session may have queued before it counts as lagging.
pub const SESSION_QUEUE_DEPTH: usize = 64;

/// How long a finished session may spend flushing queued frames.
const WRITER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Session {
    outbox: mpsc::Sender<Message>,
    evicted: Arc<Notify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    ClientClosed,
    ServerClosing,
    Lagging,
}

/// Registry of live notification sessions.
#[derive(Debug)]
pub struct NotificationHub {
    clients: DashMap<Uuid, Session>,
    closing: watch::Sender<bool>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            clients: DashMap::new(),
            closing,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Broadcast an event to every connected client. Returns how many
    /// sessions accepted it. Clients with a full queue are disconnected.
    pub fn publish(&self, topic: &str, data: Value) -> usize {
        let message = ServerMessage::Event {
            topic: topic.to_string(),
            data,
        }
        .to_message();

        let mut delivered = 0;
        let mut lagging = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().outbox.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => lagging.push(*entry.key()),
                Err(TrySendError::Closed(_)) => {}
            }
        }

        // Removal happens outside the iteration to avoid holding shard locks.
        for client_id in lagging {
            if let Some((_, session)) = self.clients.remove(&client_id) {
                session.evicted.notify_one();
                tracing::warn!(client_id = %client_id, topic, "Disconnecting lagging WebSocket client");
            }
        }
        metrics::set_ws_sessions(self.clients.len());

        tracing::debug!(topic, delivered, "Published notification");
        delivered
    }

    fn reply_to(text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => ServerMessage::Pong,
            Err(_) => ServerMessage::Error {
                message: "unsupported message".to_string(),
            },
        }
    }

    fn going_away() -> Message {
        Message::Close(Some(CloseFrame {
            code: close_code::AWAY,
            reason: Utf8Bytes::from_static("server shutting down"),
        }))
    }
}

#[async_trait]
impl RealtimeService for NotificationHub {
    async fn on_connect(&self, mut socket: WebSocket, peer: PeerInfo) {
        // Subscribe before registering: a shutdown that lands after this
        // line is seen by `changed()`, one that landed before by `borrow`.
        let mut closing = self.closing.subscribe();
        let already_closing = *closing.borrow_and_update();
        if already_closing {
            let _ = socket.send(Self::going_away()).await;
            return;
        }

        let client_id = Uuid::new_v4();
        let (mut sink, mut stream) = socket.split();
        let (outbox, mut queued) = mpsc::channel::<Message>(SESSION_QUEUE_DEPTH);
        let evicted = Arc::new(Notify::new());

        let _ = outbox.try_send(ServerMessage::Connected { client_id }.to_message());
        self.clients.insert(
            client_id,
            Session {
                outbox: outbox.clone(),
                evicted: evicted.clone(),
            },
        );
        metrics::set_ws_sessions(self.clients.len());
        tracing::info!(
            client_id = %client_id,
            peer = %peer.addr,
            origin = ?peer.origin,
            "WebSocket client connected"
        );

        let mut writer = tokio::spawn(async move {
            while let Some(message) = queued.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let ending = loop {
            let ended = tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = Self::reply_to(text.as_str()).to_message();
                        outbox.try_send(reply).err().map(|_| Ending::Lagging)
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::Error {
                            message: "binary frames are not supported".to_string(),
                        }
                        .to_message();
                        outbox.try_send(reply).err().map(|_| Ending::Lagging)
                    }
                    // Pings are answered by the protocol layer.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => None,
                    Some(Ok(Message::Close(_))) | None => Some(Ending::ClientClosed),
                    Some(Err(e)) => {
                        tracing::debug!(client_id = %client_id, error = %e, "WebSocket read error");
                        Some(Ending::ClientClosed)
                    }
                },
                _ = closing.changed() => {
                    let _ = outbox.try_send(Self::going_away());
                    Some(Ending::ServerClosing)
                }
                _ = evicted.notified() => Some(Ending::Lagging),
            };
            if let Some(ending) = ended {
                break ending;
            }
        };

        self.clients.remove(&client_id);
        drop(outbox);
        metrics::set_ws_sessions(self.clients.len());

        if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
        tracing::info!(client_id = %client_id, ending = ?ending, "WebSocket client disconnected");
    }

    async fn shutdown(&self) {
        if self.closing.send_replace(true) {
            return;
        }
        tracing::info!(sessions = self.clients.len(), "Closing WebSocket sessions");
    }
}
