//! Postgres-backed agent registry.
//!
//! Sweeps and rate-limit accounting are single `UPDATE` statements so the
//! counters are only ever changed by the database, never read-modify-written
//! by a server process.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use jobrelay_agents::{Agent, AgentStatus, HEARTBEAT_TIMEOUT_SECS};
use jobrelay_core::{AgentRecordId, OwnerId};

use super::{AgentRegistry, AgentRegistryError};

const AGENT_COLUMNS: &str = "id, owner_id, agent_id, name, status, metadata, active_tasks, \
     last_heartbeat, tasks_this_hour, max_tasks_per_hour, rate_limit_reset_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresAgentRegistry {
    pool: PgPool,
    default_max_tasks_per_hour: u32,
}

impl PostgresAgentRegistry {
    pub fn new(pool: PgPool, default_max_tasks_per_hour: u32) -> Self {
        Self {
            pool,
            default_max_tasks_per_hour,
        }
    }

    async fn fetch(&self, agent_id: &str) -> Result<Option<Agent>, AgentRegistryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1"))
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(agent_from_row).transpose()
    }
}

#[async_trait]
impl AgentRegistry for PostgresAgentRegistry {
    #[instrument(skip(self, metadata), fields(owner = %owner), err)]
    async fn register(
        &self,
        owner: OwnerId,
        agent_id: &str,
        name: Option<String>,
        metadata: JsonValue,
    ) -> Result<Agent, AgentRegistryError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("register", e))?;

        let existing = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1 FOR UPDATE"
        ))
        .bind(agent_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("register", e))?;

        let agent = match existing.as_ref().map(agent_from_row).transpose()? {
            Some(mut agent) => {
                if agent.owner != owner {
                    return Err(AgentRegistryError::OwnershipMismatch(agent_id.to_string()));
                }
                agent.re_register(name, metadata, now);
                sqlx::query(
                    r#"
                    UPDATE agents
                    SET name = $2, metadata = $3, status = $4, last_heartbeat = $5, updated_at = $5
                    WHERE agent_id = $1
                    "#,
                )
                .bind(agent_id)
                .bind(&agent.name)
                .bind(&agent.metadata)
                .bind(agent.status.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("register", e))?;
                agent
            }
            None => {
                let agent = Agent::pair(
                    owner,
                    agent_id,
                    name,
                    metadata,
                    self.default_max_tasks_per_hour,
                    now,
                );
                sqlx::query(&format!(
                    "INSERT INTO agents ({AGENT_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)"
                ))
                .bind(agent.id.as_uuid())
                .bind(agent.owner.as_uuid())
                .bind(&agent.agent_id)
                .bind(&agent.name)
                .bind(agent.status.as_str())
                .bind(&agent.metadata)
                .bind(agent.active_tasks as i32)
                .bind(agent.last_heartbeat)
                .bind(agent.tasks_this_hour as i32)
                .bind(agent.max_tasks_per_hour as i32)
                .bind(agent.rate_limit_reset_at)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("register", e))?;
                info!(agent_id, "agent paired");
                agent
            }
        };

        tx.commit().await.map_err(|e| map_sqlx_error("register", e))?;
        Ok(agent)
    }

    async fn heartbeat(
        &self,
        agent_id: &str,
        status: AgentStatus,
        active_tasks: u32,
    ) -> Result<Agent, AgentRegistryError> {
        let row = sqlx::query(&format!(
            "UPDATE agents
             SET status = $2, active_tasks = $3, last_heartbeat = $4, updated_at = $4
             WHERE agent_id = $1
             RETURNING {AGENT_COLUMNS}"
        ))
        .bind(agent_id)
        .bind(status.as_str())
        .bind(i32::try_from(active_tasks).unwrap_or(i32::MAX))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("heartbeat", e))?
        .ok_or_else(|| AgentRegistryError::NotFound(agent_id.to_string()))?;
        agent_from_row(&row)
    }

    async fn get(&self, agent_id: &str) -> Result<Option<Agent>, AgentRegistryError> {
        self.fetch(agent_id).await
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<Agent>, AgentRegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE owner_id = $1 ORDER BY agent_id"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_for_owner", e))?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, AgentRegistryError> {
        let cutoff = now - Duration::seconds(HEARTBEAT_TIMEOUT_SECS);
        let done = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'OFFLINE', updated_at = $1
            WHERE status IN ('ONLINE', 'BUSY', 'IDLE')
              AND (last_heartbeat IS NULL OR last_heartbeat < $2)
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("sweep", e))?;
        Ok(done.rows_affected() as usize)
    }

    async fn rate_limit_check(&self, agent_id: &str) -> Result<bool, AgentRegistryError> {
        self.fetch(agent_id)
            .await?
            .map(|a| a.has_capacity())
            .ok_or_else(|| AgentRegistryError::NotFound(agent_id.to_string()))
    }

    async fn try_record_claim(&self, agent_id: &str) -> Result<bool, AgentRegistryError> {
        let row = sqlx::query(
            r#"
            UPDATE agents
            SET tasks_this_hour = tasks_this_hour + 1, updated_at = $2
            WHERE agent_id = $1 AND tasks_this_hour < max_tasks_per_hour
            RETURNING id
            "#,
        )
        .bind(agent_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_record_claim", e))?;

        if row.is_some() {
            return Ok(true);
        }
        // Distinguish "over budget" from "unknown agent".
        match self.fetch(agent_id).await? {
            Some(_) => Ok(false),
            None => Err(AgentRegistryError::NotFound(agent_id.to_string())),
        }
    }

    async fn reset_sweep(&self, now: DateTime<Utc>) -> Result<usize, AgentRegistryError> {
        let done = sqlx::query(
            r#"
            UPDATE agents
            SET tasks_this_hour = 0,
                rate_limit_reset_at = rate_limit_reset_at + INTERVAL '1 hour',
                updated_at = $1
            WHERE rate_limit_reset_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_sweep", e))?;
        Ok(done.rows_affected() as usize)
    }
}

fn agent_from_row(row: &sqlx::postgres::PgRow) -> Result<Agent, AgentRegistryError> {
    let decode = |e: sqlx::Error| AgentRegistryError::Storage(format!("failed to decode agent row: {e}"));
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let owner: Uuid = row.try_get("owner_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let active_tasks: i32 = row.try_get("active_tasks").map_err(decode)?;
    let tasks_this_hour: i32 = row.try_get("tasks_this_hour").map_err(decode)?;
    let max_tasks_per_hour: i32 = row.try_get("max_tasks_per_hour").map_err(decode)?;

    Ok(Agent {
        id: AgentRecordId::from_uuid(id),
        owner: OwnerId::from_uuid(owner),
        agent_id: row.try_get("agent_id").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        status: status
            .parse()
            .map_err(|e| AgentRegistryError::Storage(format!("corrupt agent row: {e}")))?,
        metadata: row.try_get("metadata").map_err(decode)?,
        active_tasks: active_tasks.max(0) as u32,
        last_heartbeat: row.try_get("last_heartbeat").map_err(decode)?,
        tasks_this_hour: tasks_this_hour.max(0) as u32,
        max_tasks_per_hour: max_tasks_per_hour.max(0) as u32,
        rate_limit_reset_at: row.try_get("rate_limit_reset_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AgentRegistryError {
    match err {
        sqlx::Error::Database(db_err) => {
            AgentRegistryError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            AgentRegistryError::Storage(format!("connection pool closed in {operation}"))
        }
        other => AgentRegistryError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
