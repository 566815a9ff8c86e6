//! Task Store: persisted work items and their lifecycle transitions.
//!
//! The store is the only writer of task state. Every backend applies the
//! transition rules from `jobrelay-tasks`, so the state machine is the same
//! in memory and in Postgres.

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use jobrelay_core::{BlueprintId, OwnerId, TaskId};
use jobrelay_tasks::{Task, TaskStatus, TaskType, TransitionError, TransitionOutcome};

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

/// Input for [`TaskStore::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub owner: OwnerId,
    pub task_type: TaskType,
    pub payload: JsonValue,
    pub blueprint_id: Option<BlueprintId>,
    pub priority: i32,
}

impl NewTask {
    pub fn new(owner: OwnerId, task_type: TaskType, payload: JsonValue) -> Self {
        Self {
            owner,
            task_type,
            payload,
            blueprint_id: None,
            priority: 0,
        }
    }

    pub fn for_blueprint(mut self, blueprint_id: BlueprintId) -> Self {
        self.blueprint_id = Some(blueprint_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A non-terminal task already exists for this (blueprint, type).
    #[error("an active {task_type} task already exists for blueprint {blueprint_id}")]
    Conflict {
        blueprint_id: BlueprintId,
        task_type: TaskType,
    },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// The task after `complete`/`fail`, and whether this call wrote the
/// terminal status or found it already written.
#[derive(Debug, Clone, PartialEq)]
pub struct Transitioned {
    pub task: Task,
    pub outcome: TransitionOutcome,
}

impl Transitioned {
    pub fn applied(&self) -> bool {
        self.outcome == TransitionOutcome::Applied
    }
}

/// Task counts per status for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl TaskStats {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub(crate) fn add(&mut self, status: TaskStatus, n: usize) {
        self.total += n;
        *self.by_status.entry(status.as_str().to_string()).or_default() += n;
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a PENDING task. Fails with `Conflict` if the blueprint already
    /// has a non-terminal task of the same type.
    async fn create(&self, new: NewTask) -> Result<Task, TaskStoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    /// Newest first.
    async fn list_for_owner(
        &self,
        owner: OwnerId,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, TaskStoreError>;

    async fn stats(&self, owner: OwnerId) -> Result<TaskStats, TaskStoreError>;

    /// Atomically move the best eligible PENDING task of `owner` to
    /// IN_PROGRESS, bound to `agent_id`. Priority descending, then oldest.
    async fn claim_next(&self, owner: OwnerId, agent_id: &str)
    -> Result<Option<Task>, TaskStoreError>;

    /// IN_PROGRESS → COMPLETED; no-op on a terminal task.
    async fn complete(&self, id: TaskId, result: JsonValue) -> Result<Transitioned, TaskStoreError>;

    /// IN_PROGRESS → FAILED; no-op on a terminal task.
    async fn fail(&self, id: TaskId, error: String) -> Result<Transitioned, TaskStoreError>;

    /// PENDING | IN_PROGRESS → CANCELLED; no-op on a terminal task.
    async fn cancel(&self, id: TaskId) -> Result<Task, TaskStoreError>;

    /// FAILED → PENDING. Fails with `Conflict` if the blueprint already has
    /// another non-terminal task of the same type.
    async fn reset(&self, id: TaskId) -> Result<Task, TaskStoreError>;

    /// Cancel every active task of a blueprint, optionally only the given
    /// types. Returns how many tasks changed.
    async fn cancel_active_for_blueprint(
        &self,
        blueprint_id: BlueprintId,
        types: Option<&[TaskType]>,
    ) -> Result<usize, TaskStoreError>;
}
