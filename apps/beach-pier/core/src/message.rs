//! Frames exchanged over the `/ws/<client_id>` socket.
//!
//! Both directions are JSON objects discriminated by a `type` field. Inbound
//! frames are decoded in two steps so that a missing discriminator, an unknown
//! type and a known type with the wrong shape are told apart; only the last
//! one is a protocol violation, unknown types are expected from newer servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::timestamp::TimestampMs;
use crate::InstanceId;

/// Messages received from the chat server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionInfo(ConnectionInfo),
    Chat(ChatPayload),
    System(SystemNotice),
    MessageHistory(MessageHistory),
    TaskCreated(TaskEvent),
    TaskCompleted(TaskEvent),
}

impl ServerMessage {
    pub const KNOWN_TYPES: [&'static str; 6] = [
        "connection_info",
        "chat",
        "system",
        "message_history",
        "task_created",
        "task_completed",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionInfo(_) => "connection_info",
            ServerMessage::Chat(_) => "chat",
            ServerMessage::System(_) => "system",
            ServerMessage::MessageHistory(_) => "message_history",
            ServerMessage::TaskCreated(_) => "task_created",
            ServerMessage::TaskCompleted(_) => "task_completed",
        }
    }
}

/// Sent once per socket, right after the server accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub instance_id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub client_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampMs>,
}

/// A bundle of previously stored frames. Entries are kept raw because the
/// store holds every frame type, not just chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHistory {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MessageHistory {
    /// Chat-typed entries in the order the server supplied them. Entries that
    /// claim to be chat but do not parse are counted in the second element.
    pub fn chat_entries(&self) -> (Vec<ChatPayload>, usize) {
        let mut chats = Vec::new();
        let mut malformed = 0usize;
        for entry in &self.messages {
            if entry.get("type").and_then(Value::as_str) != Some("chat") {
                continue;
            }
            match ChatPayload::deserialize(entry) {
                Ok(chat) => chats.push(chat),
                Err(_) => malformed += 1,
            }
        }
        (chats, malformed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(default)]
    pub details: TaskDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Which stored history a `get_history` request reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    #[default]
    User,
    Global,
}

impl HistoryScope {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryScope::User => "user",
            HistoryScope::Global => "global",
        }
    }
}

impl std::str::FromStr for HistoryScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(HistoryScope::User),
            "global" => Ok(HistoryScope::Global),
            other => Err(format!("unknown history scope '{other}'")),
        }
    }
}

/// Messages sent from the client to the chat server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat {
        content: String,
        timestamp: i64,
    },
    GetHistory {
        limit: u32,
        history_type: HistoryScope,
    },
    TaskRequest,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::GetHistory { .. } => "get_history",
            ClientMessage::TaskRequest => "task_request",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame has no `type` discriminator")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("`{kind}` frame does not match its schema: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Short label used for log fields and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Json(_) => "json",
            DecodeError::MissingType => "missing_type",
            DecodeError::UnknownType(_) => "unknown_type",
            DecodeError::Malformed { .. } => "malformed",
        }
    }
}

pub fn decode_server_message(raw: &[u8]) -> Result<ServerMessage, DecodeError> {
    let value: Value = serde_json::from_slice(raw).map_err(DecodeError::Json)?;
    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_owned(),
        None => return Err(DecodeError::MissingType),
    };
    if !ServerMessage::KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|source| DecodeError::Malformed { kind, source })
}
