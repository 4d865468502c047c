use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::InstanceId;

/// Response of `GET /instance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: InstanceId,
    /// Seconds since the instance started.
    pub uptime: f64,
    pub connection_count: u64,
    pub active_tasks: u64,
}

impl InstanceInfo {
    /// Uptime rendered as `"<m> mins <s> secs"`.
    pub fn uptime_display(&self) -> String {
        let total = if self.uptime.is_finite() && self.uptime > 0.0 {
            self.uptime.floor() as u64
        } else {
            0
        };
        format!("{} mins {} secs", total / 60, total % 60)
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub instance_id: InstanceId,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// Response of `GET /chat/history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub count: usize,
    pub history_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_split_into_minutes_and_seconds() {
        let info: InstanceInfo = serde_json::from_str(
            r#"{"instance_id":"A","uptime":754.9,"connection_count":2,"active_tasks":1}"#,
        )
        .unwrap();
        assert_eq!(info.uptime_display(), "12 mins 34 secs");
    }

    #[test]
    fn health_status_is_case_insensitive() {
        let health: HealthStatus =
            serde_json::from_str(r#"{"status":"Healthy","instance_id":"A"}"#).unwrap();
        assert!(health.is_healthy());
    }
}
