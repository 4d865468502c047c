//! Session-scoped state derived from the inbound stream.
//!
//! Nothing in here talks to the network. The router and the outbound encoder
//! are the only writers; the presentation layer reads [`SessionSnapshot`]s.

use std::collections::HashMap;

use beach_pier_core::{ChatPayload, InstanceId, TaskDetails, TaskEvent, TaskState, TimestampMs};

use crate::connection::ConnectionState;
use crate::identity::ClientIdentity;

/// Counters for the lifetime of the process; never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub sent: u64,
    pub received: u64,
    pub tasks_created: u64,
    pub tasks_completed: u64,
}

impl SessionMetrics {
    pub(crate) fn record_sent(&mut self) {
        self.sent += 1;
    }

    pub(crate) fn record_received(&mut self) {
        self.received += 1;
    }

    pub(crate) fn record_task_created(&mut self) {
        self.tasks_created += 1;
    }

    pub(crate) fn record_task_completed(&mut self) {
        self.tasks_completed += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageRecord {
    pub sender_id: String,
    pub content: String,
    pub timestamp_ms: i64,
    pub origin_instance_id: Option<InstanceId>,
    pub is_self: bool,
    pub from_history: bool,
}

impl ChatMessageRecord {
    pub(crate) fn from_payload(
        payload: ChatPayload,
        own_id: Option<&ClientIdentity>,
        from_history: bool,
        received_at: TimestampMs,
    ) -> Self {
        let is_self = own_id.is_some_and(|id| id.as_str() == payload.client_id);
        Self {
            timestamp_ms: payload.timestamp.unwrap_or(received_at).as_millis(),
            sender_id: payload.client_id,
            content: payload.content,
            origin_instance_id: payload.instance_id,
            is_self,
            from_history,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completion frames report the outcome in `details.status`; anything
    /// other than an explicit success counts as a failure.
    fn outcome(details: &TaskDetails) -> TaskStatus {
        match details.status {
            Some(TaskState::Completed) => TaskStatus::Completed,
            _ => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub duration_seconds: Option<f64>,
    pub origin_instance_id: Option<InstanceId>,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub completed_by: Option<InstanceId>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub(crate) fn running(event: &TaskEvent) -> Self {
        Self {
            task_id: event.task_id.clone(),
            status: TaskStatus::Running,
            duration_seconds: event.details.duration,
            origin_instance_id: event.details.instance_id.clone(),
            started_at_ms: event.details.started_at.map(TimestampMs::as_millis),
            completed_at_ms: None,
            completed_by: None,
            error: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Completion<'a> {
    Transitioned(&'a TaskRecord),
    AlreadyTerminal,
    Unknown,
}

/// Background tasks keyed by id, iterated in creation order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    order: Vec<String>,
    records: HashMap<String, TaskRecord>,
}

impl TaskRegistry {
    /// Returns `false` when a record with the same id already exists.
    pub fn create(&mut self, record: TaskRecord) -> bool {
        if self.records.contains_key(&record.task_id) {
            return false;
        }
        self.order.push(record.task_id.clone());
        self.records.insert(record.task_id.clone(), record);
        true
    }

    pub fn complete(&mut self, task_id: &str, details: &TaskDetails) -> Completion<'_> {
        let Some(record) = self.records.get_mut(task_id) else {
            return Completion::Unknown;
        };
        if record.status.is_terminal() {
            return Completion::AlreadyTerminal;
        }
        record.status = TaskStatus::outcome(details);
        record.completed_at_ms = details.completed_at.map(TimestampMs::as_millis);
        record.completed_by = details.instance_id.clone();
        record.error = details.error.clone();
        if details.duration.is_some() {
            record.duration_seconds = details.duration;
        }
        Completion::Transitioned(record)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.records.get(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn running(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.status == TaskStatus::Running)
            .count()
    }
}

/// Last backend instance seen on the wire.
#[derive(Debug, Default)]
pub struct InstanceTracker {
    current: Option<InstanceId>,
}

impl InstanceTracker {
    /// Records `id` and returns the previous instance when it differs.
    pub fn observe(&mut self, id: &InstanceId) -> Option<InstanceId> {
        match self.current.replace(id.clone()) {
            Some(previous) if previous != *id => Some(previous),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&InstanceId> {
        self.current.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) client_id: Option<ClientIdentity>,
    pub(crate) metrics: SessionMetrics,
    pub(crate) tasks: TaskRegistry,
    pub(crate) messages: Vec<ChatMessageRecord>,
    pub(crate) instance: InstanceTracker,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_client_id(&mut self, id: ClientIdentity) {
        self.client_id = Some(id);
    }

    pub fn client_id(&self) -> Option<&ClientIdentity> {
        self.client_id.as_ref()
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn messages(&self) -> &[ChatMessageRecord] {
        &self.messages
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance.current()
    }

    pub fn snapshot(&self, connection: ConnectionState, reconnect_attempts: u32) -> SessionSnapshot {
        SessionSnapshot {
            connection,
            reconnect_attempts,
            client_id: self.client_id.clone(),
            instance_id: self.instance.current().cloned(),
            metrics: self.metrics,
            tasks: self.tasks.iter().cloned().collect(),
            messages: self.messages.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub client_id: Option<ClientIdentity>,
    pub instance_id: Option<InstanceId>,
    pub metrics: SessionMetrics,
    pub tasks: Vec<TaskRecord>,
    pub messages: Vec<ChatMessageRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(id: &str) -> TaskRecord {
        TaskRecord::running(&TaskEvent {
            task_id: id.into(),
            details: TaskDetails {
                duration: Some(5.0),
                instance_id: Some("A".into()),
                ..TaskDetails::default()
            },
        })
    }

    #[test]
    fn duplicate_creation_is_rejected() {
        let mut tasks = TaskRegistry::default();
        assert!(tasks.create(created("t1")));
        assert!(!tasks.create(created("t1")));
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut tasks = TaskRegistry::default();
        tasks.create(created("t1"));
        let failed = TaskDetails {
            status: Some(TaskState::Failed),
            error: Some("boom".into()),
            ..TaskDetails::default()
        };
        assert!(matches!(
            tasks.complete("t1", &failed),
            Completion::Transitioned(record) if record.status == TaskStatus::Failed
        ));
        let ok = TaskDetails {
            status: Some(TaskState::Completed),
            ..TaskDetails::default()
        };
        assert_eq!(tasks.complete("t1", &ok), Completion::AlreadyTerminal);
        assert_eq!(tasks.get("t1").unwrap().status, TaskStatus::Failed);
        assert_eq!(tasks.get("t1").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn missing_status_counts_as_failure() {
        let mut tasks = TaskRegistry::default();
        tasks.create(created("t1"));
        tasks.complete("t1", &TaskDetails::default());
        assert_eq!(tasks.get("t1").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn iteration_follows_creation_order() {
        let mut tasks = TaskRegistry::default();
        for id in ["c", "a", "b"] {
            tasks.create(created(id));
        }
        let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(tasks.running(), 3);
    }

    #[test]
    fn instance_tracker_reports_changes_only() {
        let mut tracker = InstanceTracker::default();
        assert_eq!(tracker.observe(&"A".into()), None);
        assert_eq!(tracker.observe(&"A".into()), None);
        assert_eq!(tracker.observe(&"B".into()), Some(InstanceId::from("A")));
        assert_eq!(tracker.current(), Some(&InstanceId::from("B")));
    }

    #[test]
    fn chat_record_marks_own_messages() {
        let me = ClientIdentity::parse("me123").unwrap();
        let payload = ChatPayload {
            client_id: "me123".into(),
            content: "hi".into(),
            timestamp: None,
            instance_id: None,
            client_ip: None,
        };
        let record =
            ChatMessageRecord::from_payload(payload, Some(&me), false, TimestampMs(42));
        assert!(record.is_self);
        assert_eq!(record.timestamp_ms, 42);
    }
}
