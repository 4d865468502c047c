//! Terminal presentation for the interactive `chat` command.

use beach_pier_client::outbound::DEFAULT_HISTORY_LIMIT;
use beach_pier_client::{
    ChatMessageRecord, PresentationSink, SessionSnapshot, TaskRecord, TaskStatus, UpdateEvent,
};
use beach_pier_core::{HistoryScope, TimestampMs};
use time::macros::format_description;

pub const HELP: &str = "\
commands:
  /history [n] [user|global]  request stored messages (default 50, user)
  /task                       ask the server to run a background task
  /connect                    connect, or reconnect now
  /disconnect                 close the connection and stop reconnecting
  /stats                      connection, instance and counters
  /metrics                    prometheus metrics for this process
  /quit                       exit
anything else is sent as a chat message";

#[derive(Default)]
pub struct ConsoleSink;

impl PresentationSink for ConsoleSink {
    fn publish(&mut self, event: UpdateEvent) {
        match event {
            UpdateEvent::StatusChanged(state) => println!("* {state}"),
            UpdateEvent::MessageAdded(record) => println!("{}", format_message(&record)),
            UpdateEvent::TaskUpdated(task) => println!("{}", format_task(&task)),
            UpdateEvent::MetricsChanged(_) => {}
            UpdateEvent::Notice(notice) => println!("* {notice}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Chat(String),
    History { limit: u32, scope: HistoryScope },
    Task,
    Connect,
    Disconnect,
    Stats,
    Metrics,
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Chat(line.to_owned());
    };
    let mut words = command.split_whitespace();
    match words.next().unwrap_or_default() {
        "history" => {
            let mut limit = DEFAULT_HISTORY_LIMIT;
            let mut scope = HistoryScope::default();
            for word in words {
                if let Ok(n) = word.parse::<u32>() {
                    limit = n;
                } else if let Ok(s) = word.parse::<HistoryScope>() {
                    scope = s;
                } else {
                    return Input::Invalid(format!("unexpected history argument '{word}'"));
                }
            }
            Input::History { limit, scope }
        }
        "task" => Input::Task,
        "connect" => Input::Connect,
        "disconnect" => Input::Disconnect,
        "stats" => Input::Stats,
        "metrics" => Input::Metrics,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command '/{other}'; try /help")),
    }
}

fn clock(ms: i64) -> String {
    TimestampMs(ms)
        .to_datetime()
        .and_then(|at| at.format(format_description!("[hour]:[minute]:[second]")).ok())
        .unwrap_or_else(|| "--:--:--".to_owned())
}

pub fn format_message(record: &ChatMessageRecord) -> String {
    let sender = if record.is_self {
        "you"
    } else {
        record.sender_id.as_str()
    };
    let via = record
        .origin_instance_id
        .as_ref()
        .map(|instance| format!(" via {instance}"))
        .unwrap_or_default();
    let marker = if record.from_history { "~" } else { " " };
    format!(
        "{marker}[{}] {sender}{via}: {}",
        clock(record.timestamp_ms),
        record.content
    )
}

pub fn format_task(task: &TaskRecord) -> String {
    let duration = task
        .duration_seconds
        .map(|d| format!(" ({d}s)"))
        .unwrap_or_default();
    match task.status {
        TaskStatus::Running => {
            let origin = task
                .origin_instance_id
                .as_ref()
                .map(|i| format!(" on {i}"))
                .unwrap_or_default();
            format!("+ task {} running{duration}{origin}", task.task_id)
        }
        TaskStatus::Completed | TaskStatus::Failed => {
            let by = task
                .completed_by
                .as_ref()
                .map(|i| format!(" by {i}"))
                .unwrap_or_default();
            let error = task
                .error
                .as_ref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default();
            format!(
                "+ task {} {}{duration}{by}{error}",
                task.task_id,
                task.status.as_str()
            )
        }
    }
}

pub fn format_stats(snapshot: &SessionSnapshot) -> String {
    let client = snapshot
        .client_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_owned());
    let instance = snapshot
        .instance_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_owned());
    let m = snapshot.metrics;
    let running = snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Running)
        .count();
    format!(
        "state: {} (reconnect attempts {})\nclient: {client}\ninstance: {instance}\n\
         sent: {}  received: {}  tasks created: {}  tasks completed: {}  running: {running}",
        snapshot.connection,
        snapshot.reconnect_attempts,
        m.sent,
        m.received,
        m.tasks_created,
        m.tasks_completed,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(parse_input("  hi there "), Input::Chat("hi there".into()));
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn history_arguments_in_any_order() {
        assert_eq!(
            parse_input("/history global 10"),
            Input::History {
                limit: 10,
                scope: HistoryScope::Global
            }
        );
        assert_eq!(
            parse_input("/history"),
            Input::History {
                limit: 50,
                scope: HistoryScope::User
            }
        );
        assert!(matches!(parse_input("/history soon"), Input::Invalid(_)));
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert!(matches!(parse_input("/dance"), Input::Invalid(msg) if msg.contains("/dance")));
        assert_eq!(parse_input("/quit"), Input::Quit);
    }

    #[test]
    fn message_lines_mark_origin() {
        let record = ChatMessageRecord {
            sender_id: "peer".into(),
            content: "hello".into(),
            timestamp_ms: 1_700_000_000_000,
            origin_instance_id: Some("B".into()),
            is_self: false,
            from_history: true,
        };
        assert_eq!(format_message(&record), "~[22:13:20] peer via B: hello");
    }

    #[test]
    fn failed_task_shows_error() {
        let task = TaskRecord {
            task_id: "t1".into(),
            status: TaskStatus::Failed,
            duration_seconds: Some(3.0),
            origin_instance_id: Some("A".into()),
            started_at_ms: None,
            completed_at_ms: None,
            completed_by: Some("B".into()),
            error: Some("boom".into()),
        };
        assert_eq!(format_task(&task), "+ task t1 failed (3s) by B: boom");
    }
}
