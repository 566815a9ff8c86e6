//! Postgres-backed task store.
//!
//! ## Atomic claim
//!
//! `claim_next` is a single statement:
//!
//! ```sql
//! UPDATE tasks SET status = 'IN_PROGRESS', ...
//! WHERE id = (SELECT id FROM tasks WHERE ... ORDER BY priority DESC, created_at
//!             LIMIT 1 FOR UPDATE SKIP LOCKED)
//! RETURNING ...
//! ```
//!
//! Concurrent claimers skip rows another transaction holds, so no task is
//! handed out twice.
//!
//! ## Error mapping
//!
//! | PostgreSQL code | TaskStoreError | Scenario |
//! |---|---|---|
//! | `23505` on insert or reset | `Conflict` | second active task for a (blueprint, type), caught by the partial unique index |
//! | any other | `Storage` | connection, pool, decoding failures |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use jobrelay_core::{BlueprintId, OwnerId, TaskId};
use jobrelay_tasks::{Task, TaskStatus, TaskType};

use super::{NewTask, TaskStats, TaskStore, TaskStoreError, Transitioned};

const TASK_COLUMNS: &str = "id, owner_id, task_type, status, priority, payload, result, \
     error_log, assigned_agent, blueprint_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a row under `FOR UPDATE`, apply `f` to it, and write it back.
    async fn transition<F, R>(
        &self,
        op: &'static str,
        id: TaskId,
        f: F,
    ) -> Result<(Task, R), TaskStoreError>
    where
        F: FnOnce(&mut Task) -> Result<R, TaskStoreError> + Send,
        R: Send,
    {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error(op, e))?;

        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?
            .ok_or(TaskStoreError::NotFound(id))?;

        let mut task = TaskRow::from_pg(&row)?.into_task()?;
        let before = task.clone();
        let r = f(&mut task)?;

        if task != before {
            sqlx::query(
                r#"
                UPDATE tasks
                SET status = $2, result = $3, error_log = $4, assigned_agent = $5, updated_at = $6
                WHERE id = $1
                "#,
            )
            .bind(task.id.as_uuid())
            .bind(task.status.as_str())
            .bind(&task.result)
            .bind(&task.error_log)
            .bind(&task.assigned_agent)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match task.blueprint_id {
                // A reset back to PENDING while a sibling task is active.
                Some(blueprint_id) if is_unique_violation(&e) => TaskStoreError::Conflict {
                    blueprint_id,
                    task_type: task.task_type,
                },
                _ => map_sqlx_error(op, e),
            })?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok((task, r))
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, new), fields(owner = %new.owner, task_type = %new.task_type), err)]
    async fn create(&self, new: NewTask) -> Result<Task, TaskStoreError> {
        let task = Task::new(new.owner, new.task_type, new.payload, new.blueprint_id, Utc::now())
            .with_priority(new.priority);

        sqlx::query(
            r#"
            INSERT INTO tasks (id, owner_id, task_type, status, priority, payload, result,
                               error_log, assigned_agent, blueprint_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL, NULL, $7, $8, $8)
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(task.owner.as_uuid())
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(&task.payload)
        .bind(task.blueprint_id.map(Uuid::from))
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match task.blueprint_id {
            Some(blueprint_id) if is_unique_violation(&e) => TaskStoreError::Conflict {
                blueprint_id,
                task_type: task.task_type,
            },
            _ => map_sqlx_error("create", e),
        })?;

        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(|r| TaskRow::from_pg(&r)?.into_task()).transpose()
    }

    async fn list_for_owner(
        &self,
        owner: OwnerId,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, TaskStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3"
        ))
        .bind(owner.as_uuid())
        .bind(status.map(TaskStatus::as_str))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_for_owner", e))?;

        rows.iter().map(|r| TaskRow::from_pg(r)?.into_task()).collect()
    }

    async fn stats(&self, owner: OwnerId) -> Result<TaskStats, TaskStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks WHERE owner_id = $1 GROUP BY status")
            .bind(owner.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = TaskStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            stats.add(parse_column(&status)?, usize::try_from(n).unwrap_or(0));
        }
        Ok(stats)
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn claim_next(
        &self,
        owner: OwnerId,
        agent_id: &str,
    ) -> Result<Option<Task>, TaskStoreError> {
        let executable: Vec<String> = TaskType::AGENT_EXECUTABLE
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();

        let row = sqlx::query(&format!(
            "UPDATE tasks
             SET status = 'IN_PROGRESS', assigned_agent = $2, updated_at = $3
             WHERE id = (
                 SELECT id FROM tasks
                 WHERE owner_id = $1 AND status = 'PENDING' AND task_type = ANY($4)
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(owner.as_uuid())
        .bind(agent_id)
        .bind(Utc::now())
        .bind(&executable)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(|r| TaskRow::from_pg(&r)?.into_task()).transpose()
    }

    async fn complete(&self, id: TaskId, result: JsonValue) -> Result<Transitioned, TaskStoreError> {
        let (task, outcome) = self
            .transition("complete", id, |t| Ok(t.complete(result, Utc::now())?))
            .await?;
        Ok(Transitioned { task, outcome })
    }

    async fn fail(&self, id: TaskId, error: String) -> Result<Transitioned, TaskStoreError> {
        let (task, outcome) = self
            .transition("fail", id, |t| Ok(t.fail(error, Utc::now())?))
            .await?;
        Ok(Transitioned { task, outcome })
    }

    async fn cancel(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        let (task, _) = self.transition("cancel", id, |t| Ok(t.cancel(Utc::now()))).await?;
        Ok(task)
    }

    async fn reset(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        let (task, _) = self.transition("reset", id, |t| Ok(t.reset(Utc::now())?)).await?;
        Ok(task)
    }

    #[instrument(skip(self), fields(blueprint_id = %blueprint_id), err)]
    async fn cancel_active_for_blueprint(
        &self,
        blueprint_id: BlueprintId,
        types: Option<&[TaskType]>,
    ) -> Result<usize, TaskStoreError> {
        let types: Option<Vec<String>> =
            types.map(|ts| ts.iter().map(|t| t.as_str().to_string()).collect());

        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'CANCELLED', updated_at = $2
            WHERE blueprint_id = $1
              AND status IN ('PENDING', 'IN_PROGRESS')
              AND ($3::text[] IS NULL OR task_type = ANY($3))
            "#,
        )
        .bind(blueprint_id.as_uuid())
        .bind(Utc::now())
        .bind(types)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel_active_for_blueprint", e))?;

        Ok(usize::try_from(done.rows_affected()).unwrap_or(usize::MAX))
    }
}

struct TaskRow {
    id: Uuid,
    owner_id: Uuid,
    task_type: String,
    status: String,
    priority: i32,
    payload: JsonValue,
    result: Option<JsonValue>,
    error_log: Option<String>,
    assigned_agent: Option<String>,
    blueprint_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn from_pg(row: &sqlx::postgres::PgRow) -> Result<Self, TaskStoreError> {
        let get = |e: sqlx::Error| TaskStoreError::Storage(format!("failed to decode task row: {e}"));
        Ok(Self {
            id: row.try_get("id").map_err(get)?,
            owner_id: row.try_get("owner_id").map_err(get)?,
            task_type: row.try_get("task_type").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            priority: row.try_get("priority").map_err(get)?,
            payload: row.try_get("payload").map_err(get)?,
            result: row.try_get("result").map_err(get)?,
            error_log: row.try_get("error_log").map_err(get)?,
            assigned_agent: row.try_get("assigned_agent").map_err(get)?,
            blueprint_id: row.try_get("blueprint_id").map_err(get)?,
            created_at: row.try_get("created_at").map_err(get)?,
            updated_at: row.try_get("updated_at").map_err(get)?,
        })
    }

    fn into_task(self) -> Result<Task, TaskStoreError> {
        Ok(Task {
            id: TaskId::from_uuid(self.id),
            owner: OwnerId::from_uuid(self.owner_id),
            task_type: parse_column(&self.task_type)?,
            status: parse_column(&self.status)?,
            priority: self.priority,
            payload: self.payload,
            result: self.result,
            error_log: self.error_log,
            assigned_agent: self.assigned_agent,
            blueprint_id: self.blueprint_id.map(BlueprintId::from_uuid),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_column<T>(raw: &str) -> Result<T, TaskStoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| TaskStoreError::Storage(format!("corrupt task row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TaskStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            TaskStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            TaskStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => TaskStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
