//! JSON messages exchanged over the notification socket.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected { client_id: Uuid },
    Pong,
    Error { message: String },
    Event { topic: String, data: Value },
}

impl ServerMessage {
    pub fn to_message(&self) -> Message {
        // Serializing these variants cannot fail: keys are strings, values are JSON.
        let text = serde_json::to_string(self).unwrap_or_default();
        Message::Text(text.into())
    }
}

/// Messages clients may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Ping,
}
