use core::cmp::Reverse;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use jobrelay_core::{BlueprintId, DomainError, OwnerId, TaskId};

/// Closed set of work kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    ParseResume,
    Scrape,
    DeepScrape,
    AutoApply,
    Apply,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::ParseResume,
        TaskType::Scrape,
        TaskType::DeepScrape,
        TaskType::AutoApply,
        TaskType::Apply,
    ];

    /// Types a browser agent can execute. `PARSE_RESUME` runs server-side.
    pub const AGENT_EXECUTABLE: [TaskType; 4] = [
        TaskType::Scrape,
        TaskType::DeepScrape,
        TaskType::AutoApply,
        TaskType::Apply,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::ParseResume => "PARSE_RESUME",
            TaskType::Scrape => "SCRAPE",
            TaskType::DeepScrape => "DEEP_SCRAPE",
            TaskType::AutoApply => "AUTO_APPLY",
            TaskType::Apply => "APPLY",
        }
    }

    pub fn is_agent_executable(self) -> bool {
        Self::AGENT_EXECUTABLE.contains(&self)
    }
}

impl core::fmt::Display for TaskType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown task type: {s}")))
    }
}

/// Lifecycle status.
///
/// ```text
/// PENDING ──claim──▶ IN_PROGRESS ──▶ COMPLETED | FAILED
///    │                    │
///    └──────cancel────────┴──▶ CANCELLED
/// FAILED ──operator reset──▶ PENDING
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Non-terminal statuses: the ones that count against the
    /// one-active-task-per-(blueprint, type) rule.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown task status: {s}")))
    }
}

/// Rejected lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// What a terminal-bound transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The task was already terminal; nothing changed.
    AlreadyTerminal,
}

/// A unit of delegated automation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: OwnerId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    pub error_log: Option<String>,
    pub assigned_agent: Option<String>,
    pub blueprint_id: Option<BlueprintId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        owner: OwnerId,
        task_type: TaskType,
        payload: JsonValue,
        blueprint_id: Option<BlueprintId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            owner,
            task_type,
            status: TaskStatus::Pending,
            priority: 0,
            payload,
            result: None,
            error_log: None,
            assigned_agent: None,
            blueprint_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sort key for claiming: priority descending, then oldest first.
    /// The id breaks ties between tasks created in the same instant.
    pub fn claim_precedence(&self) -> (Reverse<i32>, DateTime<Utc>, TaskId) {
        (Reverse(self.priority), self.created_at, self.id)
    }

    /// PENDING → IN_PROGRESS, bound to `agent`.
    pub fn start(&mut self, agent: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                to: TaskStatus::InProgress,
            });
        }
        self.status = TaskStatus::InProgress;
        self.assigned_agent = Some(agent.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// IN_PROGRESS → COMPLETED. Terminal tasks are left untouched.
    pub fn complete(
        &mut self,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, TransitionError> {
        let outcome = self.finish(TaskStatus::Completed, now)?;
        if outcome == TransitionOutcome::Applied {
            self.result = Some(result);
        }
        Ok(outcome)
    }

    /// IN_PROGRESS → FAILED. Only the latest error message is kept.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, TransitionError> {
        let outcome = self.finish(TaskStatus::Failed, now)?;
        if outcome == TransitionOutcome::Applied {
            self.error_log = Some(error.into());
        }
        Ok(outcome)
    }

    /// PENDING | IN_PROGRESS → CANCELLED. Never fails; terminal tasks stay as they are.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        if self.status.is_terminal() {
            return TransitionOutcome::AlreadyTerminal;
        }
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
        TransitionOutcome::Applied
    }

    /// Operator reset: FAILED → PENDING with the assignment cleared.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Failed {
            return Err(TransitionError {
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        self.status = TaskStatus::Pending;
        self.assigned_agent = None;
        self.result = None;
        self.updated_at = now;
        Ok(())
    }

    /// Shared guard for COMPLETED/FAILED.
    fn finish(
        &mut self,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, TransitionError> {
        match self.status {
            s if s.is_terminal() => Ok(TransitionOutcome::AlreadyTerminal),
            TaskStatus::InProgress => {
                self.status = to;
                self.updated_at = now;
                Ok(TransitionOutcome::Applied)
            }
            from => Err(TransitionError { from, to }),
        }
    }
}
