use std::fmt;

use beach_pier_core::{ClientMessage, HistoryScope, TimestampMs};
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::metrics;
use crate::session::SessionState;
use crate::transport::FrameSender;

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    Chat { content: String },
    History { limit: u32, scope: HistoryScope },
    Task,
}

impl OutboundRequest {
    pub fn chat(content: impl Into<String>) -> Self {
        OutboundRequest::Chat {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotConnected,
    EmptyContent,
    Encode(String),
    Transport(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotConnected => f.write_str("not connected"),
            RejectReason::EmptyContent => f.write_str("message is empty"),
            RejectReason::Encode(err) => write!(f, "could not encode frame: {err}"),
            RejectReason::Transport(err) => write!(f, "transport rejected frame: {err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Rejected(RejectReason),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Builds the wire envelope for `request`. Chat content is trimmed.
pub fn encode(request: &OutboundRequest, now: TimestampMs) -> Result<ClientMessage, RejectReason> {
    match request {
        OutboundRequest::Chat { content } => {
            let content = content.trim();
            if content.is_empty() {
                return Err(RejectReason::EmptyContent);
            }
            Ok(ClientMessage::Chat {
                content: content.to_owned(),
                timestamp: now.as_millis(),
            })
        }
        OutboundRequest::History { limit, scope } => Ok(ClientMessage::GetHistory {
            limit: *limit,
            history_type: *scope,
        }),
        OutboundRequest::Task => Ok(ClientMessage::TaskRequest),
    }
}

/// Sends `request` if, and only if, the connection is up. Nothing is queued.
pub fn send(
    state: ConnectionState,
    sender: Option<&dyn FrameSender>,
    session: &mut SessionState,
    request: &OutboundRequest,
    now: TimestampMs,
) -> SendOutcome {
    let Some(sender) = sender.filter(|_| state.is_connected()) else {
        debug!(target: "beach_pier::outbound", state = state.as_str(), "send rejected while not connected");
        return SendOutcome::Rejected(RejectReason::NotConnected);
    };
    let message = match encode(request, now) {
        Ok(message) => message,
        Err(reason) => return SendOutcome::Rejected(reason),
    };
    let text = match message.to_json() {
        Ok(text) => text,
        Err(err) => return SendOutcome::Rejected(RejectReason::Encode(err.to_string())),
    };
    if let Err(err) = sender.send_text(text) {
        warn!(target: "beach_pier::outbound", kind = message.kind(), error = %err, "transport refused frame");
        return SendOutcome::Rejected(RejectReason::Transport(err.to_string()));
    }
    metrics::record_frame_sent(message.kind());
    if matches!(message, ClientMessage::Chat { .. }) {
        session.metrics.record_sent();
    }
    SendOutcome::Sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<String>>,
        closed: bool,
    }

    impl FrameSender for Recorder {
        fn send_text(&self, text: String) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.frames.lock().push(text);
            Ok(())
        }
    }

    impl Recorder {
        fn sent(&self) -> Vec<Value> {
            self.frames
                .lock()
                .iter()
                .map(|f| serde_json::from_str(f).unwrap())
                .collect()
        }
    }

    #[test]
    fn rejects_unless_connected() {
        let recorder = Recorder::default();
        let mut session = SessionState::new();
        for state in [ConnectionState::Disconnected, ConnectionState::Connecting] {
            let outcome = send(
                state,
                Some(&recorder),
                &mut session,
                &OutboundRequest::chat("hi"),
                TimestampMs(1),
            );
            assert_eq!(outcome, SendOutcome::Rejected(RejectReason::NotConnected));
        }
        assert!(recorder.sent().is_empty());
        assert_eq!(session.metrics().sent, 0);
    }

    #[test]
    fn chat_is_trimmed_and_counted() {
        let recorder = Recorder::default();
        let mut session = SessionState::new();
        let outcome = send(
            ConnectionState::Connected,
            Some(&recorder),
            &mut session,
            &OutboundRequest::chat("  hello there \n"),
            TimestampMs(1_700_000_000_000),
        );
        assert!(outcome.is_sent());
        assert_eq!(
            recorder.sent(),
            vec![json!({"type": "chat", "content": "hello there", "timestamp": 1_700_000_000_000i64})]
        );
        assert_eq!(session.metrics().sent, 1);
    }

    #[test]
    fn blank_chat_is_rejected() {
        let recorder = Recorder::default();
        let mut session = SessionState::new();
        let outcome = send(
            ConnectionState::Connected,
            Some(&recorder),
            &mut session,
            &OutboundRequest::chat("   "),
            TimestampMs(1),
        );
        assert_eq!(outcome, SendOutcome::Rejected(RejectReason::EmptyContent));
        assert!(recorder.sent().is_empty());
    }

    #[test]
    fn requests_do_not_move_sent_counter() {
        let recorder = Recorder::default();
        let mut session = SessionState::new();
        for request in [
            OutboundRequest::History {
                limit: DEFAULT_HISTORY_LIMIT,
                scope: HistoryScope::Global,
            },
            OutboundRequest::Task,
        ] {
            let outcome = send(
                ConnectionState::Connected,
                Some(&recorder),
                &mut session,
                &request,
                TimestampMs(1),
            );
            assert!(outcome.is_sent());
        }
        assert_eq!(
            recorder.sent(),
            vec![
                json!({"type": "get_history", "limit": 50, "history_type": "global"}),
                json!({"type": "task_request"}),
            ]
        );
        assert_eq!(session.metrics().sent, 0);
    }

    #[test]
    fn transport_failure_is_reported() {
        let recorder = Recorder {
            closed: true,
            ..Recorder::default()
        };
        let mut session = SessionState::new();
        let outcome = send(
            ConnectionState::Connected,
            Some(&recorder),
            &mut session,
            &OutboundRequest::chat("hi"),
            TimestampMs(1),
        );
        assert!(matches!(
            outcome,
            SendOutcome::Rejected(RejectReason::Transport(_))
        ));
        assert_eq!(session.metrics().sent, 0);
    }
}
