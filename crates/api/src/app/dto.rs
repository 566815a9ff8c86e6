use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobrelay_agents::AgentStatus;
use jobrelay_blueprints::{BlueprintFilters, BlueprintStatus, Portal};
use jobrelay_core::BlueprintId;
use jobrelay_tasks::{TaskStatus, TaskType};

// -------------------------
// Agent protocol
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub active_tasks: u32,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationCodeResponse {
    pub code: String,
}

// -------------------------
// Tasks
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: TaskType,
    pub payload: JsonValue,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub blueprint_id: Option<BlueprintId>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCodeRequest {
    pub code: String,
}

// -------------------------
// Blueprints
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBlueprintRequest {
    pub name: String,
    #[serde(default)]
    pub portal: Portal,
    #[serde(default)]
    pub filters: BlueprintFilters,
    pub frequency_secs: u64,
    #[serde(default)]
    pub status: BlueprintStatus,
}

#[derive(Debug, Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for Items<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}
