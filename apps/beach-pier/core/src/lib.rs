//! Wire primitives shared by the `beach-pier` realtime client.
//!
//! Everything that crosses the socket or the side-channel HTTP endpoints lives
//! here so the client runtime, the CLI and test harnesses agree on a single
//! set of message shapes. The crate does no I/O.

pub mod message;
pub mod status;
pub mod timestamp;

pub use message::{
    decode_server_message, ChatPayload, ClientMessage, ConnectionInfo, DecodeError,
    HistoryScope, MessageHistory, ServerMessage, SystemNotice, TaskDetails, TaskEvent, TaskState,
};
pub use status::{HealthStatus, HistoryPage, InstanceInfo};
pub use timestamp::{TimestampError, TimestampMs};

/// Identifier of the backend process that served a frame.
///
/// Instances come and go behind the load balancer, so two frames on the same
/// socket may legitimately carry different values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        InstanceId(value.to_owned())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        InstanceId(value)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
