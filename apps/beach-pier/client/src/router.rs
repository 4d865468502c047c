//! Applies inbound frames to [`SessionState`].
//!
//! Frames are handled one at a time, in arrival order, by the runtime
//! driver. Every frame that carries a `type` discriminator counts as
//! received, whether or not this client understands it; frames that fail to
//! decode are dropped with a warning and leave the session untouched.

use beach_pier_core::{
    decode_server_message, ConnectionInfo, DecodeError, InstanceId, MessageHistory,
    ServerMessage, TaskEvent, TimestampMs,
};
use tracing::{debug, info, warn};

use crate::events::{Notice, UpdateEvent};
use crate::metrics;
use crate::session::{ChatMessageRecord, Completion, SessionState, TaskRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled(&'static str),
    /// Well-formed frame of a type this client does not know.
    Ignored(String),
    /// Frame that could not be decoded; carries the drop reason.
    Dropped(&'static str),
}

#[derive(Debug)]
pub struct Dispatch {
    pub outcome: DispatchOutcome,
    pub events: Vec<UpdateEvent>,
}

pub fn dispatch(session: &mut SessionState, raw: &[u8]) -> Dispatch {
    dispatch_at(session, raw, TimestampMs::now())
}

/// Like [`dispatch`], with an explicit receipt time for frames that carry
/// no timestamp of their own.
pub fn dispatch_at(session: &mut SessionState, raw: &[u8], received_at: TimestampMs) -> Dispatch {
    let mut events = Vec::new();
    let message = match decode_server_message(raw) {
        Ok(message) => message,
        Err(DecodeError::UnknownType(kind)) => {
            session.metrics.record_received();
            metrics::record_frame_received("unknown");
            debug!(target: "beach_pier::router", kind = %kind, "ignoring unknown frame type");
            events.push(UpdateEvent::MetricsChanged(session.metrics));
            return Dispatch {
                outcome: DispatchOutcome::Ignored(kind),
                events,
            };
        }
        Err(err) => {
            warn!(
                target: "beach_pier::router",
                reason = err.reason(),
                error = %err,
                bytes = raw.len(),
                "dropping undecodable frame"
            );
            metrics::record_frame_dropped(err.reason());
            return Dispatch {
                outcome: DispatchOutcome::Dropped(err.reason()),
                events,
            };
        }
    };

    let kind = message.kind();
    session.metrics.record_received();
    metrics::record_frame_received(kind);

    match message {
        ServerMessage::ConnectionInfo(info) => on_connection_info(session, info, &mut events),
        ServerMessage::Chat(chat) => {
            let instance = chat.instance_id.clone();
            let record = ChatMessageRecord::from_payload(
                chat,
                session.client_id.as_ref(),
                false,
                received_at,
            );
            session.messages.push(record.clone());
            events.push(UpdateEvent::MessageAdded(record));
            if let Some(instance) = instance {
                check_instance(session, &instance, &mut events);
            }
        }
        ServerMessage::System(notice) => {
            events.push(UpdateEvent::Notice(Notice::System {
                content: notice.content,
                instance_id: notice.instance_id.clone(),
            }));
            if let Some(instance) = notice.instance_id {
                check_instance(session, &instance, &mut events);
            }
        }
        ServerMessage::MessageHistory(history) => {
            on_history(session, history, received_at, &mut events)
        }
        ServerMessage::TaskCreated(event) => on_task_created(session, &event, &mut events),
        ServerMessage::TaskCompleted(event) => on_task_completed(session, &event, &mut events),
    }

    events.push(UpdateEvent::MetricsChanged(session.metrics));
    Dispatch {
        outcome: DispatchOutcome::Handled(kind),
        events,
    }
}

fn on_connection_info(session: &mut SessionState, info: ConnectionInfo, events: &mut Vec<UpdateEvent>) {
    check_instance(session, &info.instance_id, events);
    info!(
        target: "beach_pier::router",
        instance_id = %info.instance_id,
        connection_count = ?info.connection_count,
        "server assigned instance"
    );
    events.push(UpdateEvent::Notice(Notice::ConnectedToInstance {
        instance_id: info.instance_id,
        connection_count: info.connection_count,
    }));
    if let Some(ip) = info.client_ip {
        events.push(UpdateEvent::Notice(Notice::ClientAddress(ip)));
    }
}

fn on_history(
    session: &mut SessionState,
    history: MessageHistory,
    received_at: TimestampMs,
    events: &mut Vec<UpdateEvent>,
) {
    let (chats, malformed) = history.chat_entries();
    if malformed > 0 {
        warn!(target: "beach_pier::router", malformed, "history contained unreadable chat entries");
    }
    let loaded = chats.len();
    for chat in chats {
        let record =
            ChatMessageRecord::from_payload(chat, session.client_id.as_ref(), true, received_at);
        session.messages.push(record.clone());
        events.push(UpdateEvent::MessageAdded(record));
    }
    events.push(UpdateEvent::Notice(Notice::HistoryLoaded {
        source: history.source.unwrap_or_else(|| "history".to_owned()),
        total: history.messages.len(),
        chats: loaded,
    }));
}

fn on_task_created(session: &mut SessionState, event: &TaskEvent, events: &mut Vec<UpdateEvent>) {
    let record = TaskRecord::running(event);
    if session.tasks.create(record.clone()) {
        session.metrics.record_task_created();
        events.push(UpdateEvent::TaskUpdated(record));
    } else {
        debug!(target: "beach_pier::router", task_id = %event.task_id, "duplicate task_created ignored");
    }
}

fn on_task_completed(session: &mut SessionState, event: &TaskEvent, events: &mut Vec<UpdateEvent>) {
    match session.tasks.complete(&event.task_id, &event.details) {
        Completion::Transitioned(record) => {
            let record = record.clone();
            session.metrics.record_task_completed();
            events.push(UpdateEvent::TaskUpdated(record));
        }
        Completion::Unknown => {
            // Created before this session started; only the counter moves.
            session.metrics.record_task_completed();
            debug!(target: "beach_pier::router", task_id = %event.task_id, "completion for unknown task");
        }
        Completion::AlreadyTerminal => {
            debug!(target: "beach_pier::router", task_id = %event.task_id, "duplicate task_completed ignored");
            return;
        }
    }

    if let (Some(completed_on), Some(current)) =
        (event.details.instance_id.as_ref(), session.instance.current())
    {
        if completed_on != current {
            events.push(UpdateEvent::Notice(Notice::TaskInstanceMismatch {
                task_id: event.task_id.clone(),
                completed_on: completed_on.clone(),
                current: current.clone(),
            }));
        }
    }
}

fn check_instance(session: &mut SessionState, id: &InstanceId, events: &mut Vec<UpdateEvent>) {
    if let Some(previous) = session.instance.observe(id) {
        info!(
            target: "beach_pier::router",
            previous = %previous,
            current = %id,
            "backend instance changed"
        );
        events.push(UpdateEvent::Notice(Notice::InstanceChanged {
            previous,
            current: id.clone(),
        }));
    }
}
