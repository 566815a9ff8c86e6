//! Blueprint Scheduler: turns due blueprints into tasks and applies the
//! cancellation side effects of blueprint state changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use jobrelay_blueprints::{cancellation_scope, Blueprint, BlueprintPatch, CancelScope};
use jobrelay_core::BlueprintId;
use jobrelay_tasks::{Task, TaskStatus, TaskType};

use super::{BlueprintStore, BlueprintStoreError};
use crate::tasks::{NewTask, TaskStore, TaskStoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The previous delivery for this blueprint is still in flight.
    #[error("a {task_type} task for blueprint {blueprint_id} is already running")]
    AlreadyRunning {
        blueprint_id: BlueprintId,
        task_type: TaskType,
    },

    #[error(transparent)]
    Blueprints(#[from] BlueprintStoreError),

    #[error(transparent)]
    Tasks(#[from] TaskStoreError),
}

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Created(Task),
    NotDue,
    /// IDLE blueprints never produce work.
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub created: usize,
    pub not_due: usize,
    pub already_running: usize,
    pub failed: usize,
}

pub struct BlueprintService {
    blueprints: Arc<dyn BlueprintStore>,
    tasks: Arc<dyn TaskStore>,
}

impl BlueprintService {
    pub fn new(blueprints: Arc<dyn BlueprintStore>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { blueprints, tasks }
    }

    pub fn store(&self) -> &Arc<dyn BlueprintStore> {
        &self.blueprints
    }

    /// Create the next task if the blueprint is due.
    pub async fn evaluate(&self, bp: &Blueprint, now: DateTime<Utc>) -> Result<Delivery, SchedulerError> {
        if !bp.should_deliver_now(now) {
            return Ok(Delivery::NotDue);
        }
        self.deliver(bp, now).await
    }

    /// Deliver regardless of schedule (manual trigger). Still refuses to
    /// stack a second active task on the blueprint.
    pub async fn deliver_now(&self, id: BlueprintId, now: DateTime<Utc>) -> Result<Delivery, SchedulerError> {
        let bp = self
            .blueprints
            .get(id)
            .await?
            .ok_or(BlueprintStoreError::NotFound(id))?;
        self.deliver(&bp, now).await
    }

    async fn deliver(&self, bp: &Blueprint, now: DateTime<Utc>) -> Result<Delivery, SchedulerError> {
        let Some(task_type) = bp.delivery_task_type() else {
            return Ok(Delivery::Idle);
        };

        let payload = serde_json::to_value(bp.scrape_payload())
            .map_err(|e| TaskStoreError::Storage(format!("encode payload: {e}")))?;
        let new = NewTask::new(bp.owner, task_type, payload).for_blueprint(bp.id);

        let task = match self.tasks.create(new).await {
            Ok(task) => task,
            Err(TaskStoreError::Conflict { .. }) => {
                return Err(SchedulerError::AlreadyRunning {
                    blueprint_id: bp.id,
                    task_type,
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.blueprints.record_delivery(bp.id, now).await?;
        info!(blueprint_id = %bp.id, task_id = %task.id, task_type = %task_type, "blueprint delivered");
        Ok(Delivery::Created(task))
    }

    /// Apply a patch and cancel whatever in-flight work the change invalidates.
    pub async fn update(
        &self,
        id: BlueprintId,
        patch: BlueprintPatch,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, SchedulerError> {
        let update = self.blueprints.update(id, patch, now).await?;

        if let Some(scope) = cancellation_scope(&update.previous, &update.current) {
            let types = match &scope {
                CancelScope::All => None,
                CancelScope::Only(types) => Some(types.as_slice()),
            };
            let cancelled = self.tasks.cancel_active_for_blueprint(id, types).await?;
            info!(blueprint_id = %id, ?scope, cancelled, "cancelled tasks after blueprint change");
        }

        Ok(update.current)
    }

    /// Evaluate every active blueprint. Individual failures are logged and
    /// counted; they never abort the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::default();
        for bp in self.blueprints.list_active().await? {
            match self.evaluate(&bp, now).await {
                Ok(Delivery::Created(_)) => report.created += 1,
                Ok(Delivery::NotDue) | Ok(Delivery::Idle) => report.not_due += 1,
                Err(SchedulerError::AlreadyRunning { .. }) => {
                    debug!(blueprint_id = %bp.id, "previous delivery still running");
                    report.already_running += 1;
                }
                Err(e) => {
                    warn!(blueprint_id = %bp.id, error = %e, "blueprint evaluation failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Credit a completed discovery task's job count to its blueprint.
    pub async fn record_task_outcome(&self, task: &Task) -> Result<(), SchedulerError> {
        let Some(blueprint_id) = task.blueprint_id else {
            return Ok(());
        };
        if task.status != TaskStatus::Completed {
            return Ok(());
        }
        let jobs = task.result.as_ref().map(jobs_in_result).unwrap_or(0);
        if jobs > 0 {
            self.blueprints
                .record_matches(blueprint_id, jobs, Utc::now())
                .await?;
            debug!(blueprint_id = %blueprint_id, task_id = %task.id, jobs, "recorded matches");
        }
        Ok(())
    }
}

/// `jobs_found` if present, otherwise the length of the `jobs` array.
pub fn jobs_in_result(result: &JsonValue) -> u64 {
    result
        .get("jobs_found")
        .and_then(JsonValue::as_u64)
        .or_else(|| result.get("jobs").and_then(JsonValue::as_array).map(|a| a.len() as u64))
        .unwrap_or(0)
}
