//! What an agent sends back when it finishes a task.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobrelay_core::TaskId;

use crate::task::TaskStatus;

/// Terminal statuses an agent may report.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Completed,
    Failed,
}

impl From<ReportStatus> for TaskStatus {
    fn from(value: ReportStatus) -> Self {
        match value {
            ReportStatus::Completed => TaskStatus::Completed,
            ReportStatus::Failed => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub status: ReportStatus,
    #[serde(default)]
    pub result_data: Option<JsonValue>,
    #[serde(default)]
    pub error_log: Option<String>,
}

impl TaskReport {
    pub fn completed(task_id: TaskId, result: JsonValue) -> Self {
        Self {
            task_id,
            status: ReportStatus::Completed,
            result_data: Some(result),
            error_log: None,
        }
    }

    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: ReportStatus::Failed,
            result_data: None,
            error_log: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_wire_shape() {
        let id = TaskId::new();
        let v = serde_json::to_value(TaskReport::failed(id, "HTTP 500")).unwrap();
        assert_eq!(v["status"], "FAILED");
        assert_eq!(v["error_log"], "HTTP 500");

        let parsed: TaskReport =
            serde_json::from_value(json!({"task_id": id, "status": "COMPLETED"})).unwrap();
        assert_eq!(parsed.status, ReportStatus::Completed);
        assert!(parsed.result_data.is_none());
    }
}
