use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    Connector, InboundFrame, OutboundFrame, TransportError, TransportEvent, TransportEventKind,
    TransportHandle,
};
use crate::connection::ConnectionId;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WebSocketConnector {
    fn open(
        &self,
        endpoint: &Url,
        connection: ConnectionId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            endpoint.to_string(),
            connection,
            outbound_rx,
            events,
            self.connect_timeout,
        ));
        TransportHandle::new(connection, outbound_tx, Some(task))
    }
}

async fn run_socket(
    url: String,
    connection: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
    connect_timeout: Duration,
) {
    let emit = |kind: TransportEventKind| {
        let _ = events.send(TransportEvent { connection, kind });
    };

    debug!(target: "beach_pier::transport", connection = %connection, url = %url, "connecting websocket");
    let stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            let err = TransportError::WebSocket(err.to_string());
            warn!(target: "beach_pier::transport", connection = %connection, error = %err, "websocket connect failed");
            emit(TransportEventKind::Error(err.to_string()));
            emit(TransportEventKind::Closed { reason: None });
            return;
        }
        Err(_) => {
            let err = TransportError::Timeout(connect_timeout);
            warn!(target: "beach_pier::transport", connection = %connection, error = %err, "websocket connect failed");
            emit(TransportEventKind::Error(err.to_string()));
            emit(TransportEventKind::Closed { reason: None });
            return;
        }
    };
    emit(TransportEventKind::Opened);

    let (mut sink, mut stream) = stream.split();
    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    trace!(target: "beach_pier::transport", connection = %connection, bytes = text.len(), "sending frame");
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        emit(TransportEventKind::Error(err.to_string()));
                        break None;
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break Some("closed by client".to_string());
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportEventKind::Frame(InboundFrame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    emit(TransportEventKind::Frame(InboundFrame::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|frame| frame.reason.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    emit(TransportEventKind::Error(err.to_string()));
                    break None;
                }
                None => break None,
            }
        }
    };
    debug!(target: "beach_pier::transport", connection = %connection, reason = ?reason, "websocket closed");
    emit(TransportEventKind::Closed { reason });
}
