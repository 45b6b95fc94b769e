use crate::models::{Message, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server → client envelope: `{"type": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Sent once after the connection is registered
    Connected(ConnectedData),
    /// Persisted message, echoed to the sender and pushed to the recipient
    Message(Message),
    /// Recoverable failure; the connection stays open
    Error(ErrorData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

impl ServerFrame {
    pub fn connected(user_id: Uuid, role: Role) -> Self {
        ServerFrame::Connected(ConnectedData { user_id, role })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorData {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Client → server envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ClientFrame {
    Message(InboundMessage),
}

/// Inbound chat message. Every field is optional on the wire so that a
/// missing field becomes an `error` frame instead of a dropped socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
}

impl ClientFrame {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
