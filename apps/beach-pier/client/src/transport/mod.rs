pub mod websocket;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use url::Url;

use crate::connection::ConnectionId;

pub use websocket::WebSocketConnector;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl InboundFrame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            InboundFrame::Text(text) => text.as_bytes(),
            InboundFrame::Binary(data) => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Frame(InboundFrame),
    Error(String),
    Closed { reason: Option<String> },
}

/// Everything a transport reports is tagged with the connection it belongs
/// to so that late events from a replaced socket can be recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub connection: ConnectionId,
    pub kind: TransportEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Anything that can carry an encoded text frame to the server.
pub trait FrameSender {
    fn send_text(&self, text: String) -> Result<(), TransportError>;
}

/// Owning handle to one open (or opening) transport. Dropping it tears the
/// transport down without a close handshake.
#[derive(Debug)]
pub struct TransportHandle {
    connection: ConnectionId,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(
        connection: ConnectionId,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            connection,
            outbound,
            task,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Requests a close handshake and aborts the transport if it has not
    /// finished within a short grace period.
    pub fn close(mut self) {
        trace!(target: "beach_pier::transport", connection = %self.connection, "closing transport");
        let _ = self.outbound.send(OutboundFrame::Close);
        if let Some(mut task) = self.task.take() {
            tokio::spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            });
        }
    }
}

impl FrameSender for TransportHandle {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens transports on behalf of the driver.
///
/// Implementations must report `Opened` at most once, then any number of
/// frames and errors, and finally exactly one `Closed`, all tagged with the
/// supplied connection id.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        endpoint: &Url,
        connection: ConnectionId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportHandle;
}
