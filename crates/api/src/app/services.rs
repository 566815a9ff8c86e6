//! Store wiring and the request flows that span more than one store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use jobrelay_agents::Agent;
use jobrelay_core::{OwnerId, TaskId};
use jobrelay_infra::workers::{
    WorkerHandle, spawn_blueprint_scheduler, spawn_heartbeat_sweeper, spawn_rate_limit_resetter,
};
use jobrelay_infra::{
    AgentRegistry, BlueprintService, InMemoryAgentRegistry, InMemoryBlueprintStore, InMemoryTaskStore,
    PostgresAgentRegistry, PostgresBlueprintStore, PostgresTaskStore, ServerConfig, TaskStore,
    VerificationMailbox,
};
use jobrelay_tasks::{ReportStatus, Task, TaskReport};

use crate::app::errors::ApiError;

pub struct AppServices {
    pub tasks: Arc<dyn TaskStore>,
    pub agents: Arc<dyn AgentRegistry>,
    pub blueprints: Arc<BlueprintService>,
    pub codes: VerificationMailbox,
}

impl AppServices {
    pub fn new(tasks: Arc<dyn TaskStore>, agents: Arc<dyn AgentRegistry>, blueprints: Arc<BlueprintService>) -> Self {
        Self {
            tasks,
            agents,
            blueprints,
            codes: VerificationMailbox::new(),
        }
    }

    pub fn in_memory(default_max_tasks_per_hour: u32) -> Self {
        let tasks: Arc<dyn TaskStore> = InMemoryTaskStore::arc();
        let blueprints = Arc::new(BlueprintService::new(
            Arc::new(InMemoryBlueprintStore::new()),
            tasks.clone(),
        ));
        Self::new(
            tasks,
            Arc::new(InMemoryAgentRegistry::new(default_max_tasks_per_hour)),
            blueprints,
        )
    }

    pub fn postgres(pool: PgPool, default_max_tasks_per_hour: u32) -> Self {
        let tasks: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(pool.clone()));
        let blueprints = Arc::new(BlueprintService::new(
            Arc::new(PostgresBlueprintStore::new(pool.clone())),
            tasks.clone(),
        ));
        Self::new(
            tasks,
            Arc::new(PostgresAgentRegistry::new(pool, default_max_tasks_per_hour)),
            blueprints,
        )
    }

    /// Postgres when `DATABASE_URL` is set, in-memory otherwise.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, sqlx::Error> {
        match &config.database_url {
            Some(url) => {
                let pool = jobrelay_infra::db::connect(url).await?;
                info!("using postgres stores");
                Ok(Self::postgres(pool, config.default_max_tasks_per_hour))
            }
            None => {
                warn!("DATABASE_URL not set; state is kept in memory and lost on restart");
                Ok(Self::in_memory(config.default_max_tasks_per_hour))
            }
        }
    }

    /// Heartbeat sweep, rate-window reset and scheduler tick.
    pub fn spawn_workers(&self, config: &ServerConfig) -> Vec<WorkerHandle> {
        vec![
            spawn_heartbeat_sweeper(self.agents.clone(), config.heartbeat_sweep_interval),
            spawn_rate_limit_resetter(self.agents.clone(), config.rate_limit_sweep_interval),
            spawn_blueprint_scheduler(self.blueprints.clone(), config.scheduler_tick_interval),
        ]
    }

    /// The owner's agent, or `NotFound` / `Forbidden`.
    pub async fn owned_agent(&self, owner: OwnerId, agent_id: &str) -> Result<Agent, ApiError> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("agent {agent_id}")))?;
        if agent.owner != owner {
            return Err(ApiError::Forbidden(format!("agent {agent_id} belongs to another owner")));
        }
        Ok(agent)
    }

    /// The owner's task. Other owners' tasks are reported as missing.
    pub async fn owned_task(&self, owner: OwnerId, id: TaskId) -> Result<Task, ApiError> {
        match self.tasks.get(id).await? {
            Some(task) if task.owner == owner => Ok(task),
            _ => Err(ApiError::not_found(format!("task {id}"))),
        }
    }

    /// Rate-limit check, atomic claim, then count the claim against the
    /// agent's hourly budget.
    pub async fn claim_for_agent(&self, owner: OwnerId, agent_id: &str) -> Result<Option<Task>, ApiError> {
        self.owned_agent(owner, agent_id).await?;
        if !self.agents.rate_limit_check(agent_id).await? {
            return Err(ApiError::RateLimited(format!(
                "agent {agent_id} reached its hourly task limit"
            )));
        }

        let Some(task) = self.tasks.claim_next(owner, agent_id).await? else {
            return Ok(None);
        };
        if !self.agents.try_record_claim(agent_id).await? {
            // Only reachable when the same agent claims concurrently.
            warn!(agent_id, task_id = %task.id, "claim recorded past the hourly limit");
        }
        info!(agent_id, task_id = %task.id, task_type = %task.task_type, "task claimed");
        Ok(Some(task))
    }

    /// Apply an agent's report and credit matches to the originating blueprint.
    pub async fn record_report(&self, owner: OwnerId, report: TaskReport) -> Result<Task, ApiError> {
        self.owned_task(owner, report.task_id).await?;

        let done = match report.status {
            ReportStatus::Completed => {
                let result = report.result_data.unwrap_or(JsonValue::Null);
                self.tasks.complete(report.task_id, result).await?
            }
            ReportStatus::Failed => {
                let error = report
                    .error_log
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "agent reported failure without details".to_string());
                self.tasks.fail(report.task_id, error).await?
            }
        };

        let applied = done.applied();
        let task = done.task;
        if !applied {
            debug!(task_id = %task.id, status = %task.status.as_str(), "repeated report ignored");
            return Ok(task);
        }
        if let Err(e) = self.blueprints.record_task_outcome(&task).await {
            warn!(task_id = %task.id, error = %e, "could not credit blueprint matches");
        }
        info!(task_id = %task.id, status = %task.status.as_str(), "task result recorded");
        Ok(task)
    }

    /// Hand a relayed code to the agent working on `task_id`.
    pub async fn submit_code(&self, owner: OwnerId, task_id: TaskId, code: &str) -> Result<(), ApiError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ApiError::Validation("code must not be empty".to_string()));
        }
        self.owned_task(owner, task_id).await?;
        self.codes.submit(task_id, code, Utc::now());
        Ok(())
    }
}
