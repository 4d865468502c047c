use std::fmt;
use std::time::Duration;

use beach_pier_core::InstanceId;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::ConnectionState;
use crate::session::{ChatMessageRecord, SessionMetrics, TaskRecord};

/// Observable changes published to whatever is rendering the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    StatusChanged(ConnectionState),
    MessageAdded(ChatMessageRecord),
    TaskUpdated(TaskRecord),
    MetricsChanged(SessionMetrics),
    Notice(Notice),
}

/// One-line, human readable notices.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    ConnectedToInstance {
        instance_id: InstanceId,
        connection_count: Option<u64>,
    },
    ClientAddress(String),
    System {
        content: String,
        instance_id: Option<InstanceId>,
    },
    InstanceChanged {
        previous: InstanceId,
        current: InstanceId,
    },
    HistoryLoaded {
        source: String,
        total: usize,
        chats: usize,
    },
    TaskInstanceMismatch {
        task_id: String,
        completed_on: InstanceId,
        current: InstanceId,
    },
    ConnectionLost {
        delay: Duration,
        attempt: u32,
        max_attempts: u32,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    ReconnectAbandoned {
        attempt: u32,
    },
    TransportError(String),
    EphemeralIdentity(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ConnectedToInstance {
                instance_id,
                connection_count: Some(count),
            } => write!(f, "Connected to instance {instance_id} ({count} connections)"),
            Notice::ConnectedToInstance { instance_id, .. } => {
                write!(f, "Connected to instance {instance_id}")
            }
            Notice::ClientAddress(ip) => write!(f, "Server sees this client as {ip}"),
            Notice::System {
                content,
                instance_id: Some(instance),
            } => write!(f, "[{instance}] {content}"),
            Notice::System { content, .. } => f.write_str(content),
            Notice::InstanceChanged { previous, current } => write!(
                f,
                "Routing changed: now served by instance {current} (was {previous})"
            ),
            Notice::HistoryLoaded {
                source,
                total,
                chats,
            } => write!(f, "Loaded {chats} chat messages ({total} entries) from {source}"),
            Notice::TaskInstanceMismatch {
                task_id,
                completed_on,
                current,
            } => write!(
                f,
                "Task {task_id} completed on instance {completed_on} while connected to {current}"
            ),
            Notice::ConnectionLost {
                delay,
                attempt,
                max_attempts,
            } => write!(
                f,
                "Connection lost. Reconnecting in {}s (attempt {attempt}/{max_attempts})",
                delay.as_secs_f64()
            ),
            Notice::Reconnecting {
                attempt,
                max_attempts,
            } => write!(f, "Reconnecting (attempt {attempt}/{max_attempts})"),
            Notice::ReconnectExhausted { attempts } => write!(
                f,
                "Gave up reconnecting after {attempts} attempts; use /connect to try again"
            ),
            Notice::ReconnectAbandoned { attempt } => write!(
                f,
                "Reconnect attempt {attempt} failed; use /connect to try again"
            ),
            Notice::TransportError(message) => write!(f, "Connection error: {message}"),
            Notice::EphemeralIdentity(id) => write!(
                f,
                "Could not persist client id {id}; history will not follow this client across restarts"
            ),
        }
    }
}

/// Receives every [`UpdateEvent`] in the order the driver produced them.
pub trait PresentationSink: Send {
    fn publish(&mut self, event: UpdateEvent);
}

/// Forwards events to an unbounded channel, for embedding and tests.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UpdateEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PresentationSink for ChannelSink {
    fn publish(&mut self, event: UpdateEvent) {
        if self.tx.send(event).is_err() {
            debug!(target: "beach_pier::events", "presentation receiver dropped");
        }
    }
}
