//! Postgres-backed blueprint store.
//!
//! Filters are stored as JSONB; enum columns hold their serde names.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use jobrelay_blueprints::{Blueprint, BlueprintPatch};
use jobrelay_core::{BlueprintId, OwnerId};

use super::{BlueprintStore, BlueprintStoreError, BlueprintUpdate};

const BLUEPRINT_COLUMNS: &str = "id, owner_id, name, portal, filters, frequency_secs, status, \
     is_active, snoozed_until, last_delivered_at, total_deliveries, total_jobs_matched, \
     created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresBlueprintStore {
    pool: PgPool,
}

impl PostgresBlueprintStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        op: &'static str,
        id: BlueprintId,
    ) -> Result<Blueprint, BlueprintStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BLUEPRINT_COLUMNS} FROM blueprints WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?
        .ok_or(BlueprintStoreError::NotFound(id))?;
        blueprint_from_row(&row)
    }

    async fn save(
        tx: &mut Transaction<'_, Postgres>,
        op: &'static str,
        bp: &Blueprint,
    ) -> Result<(), BlueprintStoreError> {
        sqlx::query(
            r#"
            UPDATE blueprints
            SET name = $2, portal = $3, filters = $4, frequency_secs = $5, status = $6,
                is_active = $7, snoozed_until = $8, last_delivered_at = $9,
                total_deliveries = $10, total_jobs_matched = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(bp.id.as_uuid())
        .bind(&bp.name)
        .bind(enum_text(&bp.portal)?)
        .bind(json(&bp.filters)?)
        .bind(to_i64(bp.frequency_secs))
        .bind(enum_text(&bp.status)?)
        .bind(bp.is_active)
        .bind(bp.snoozed_until)
        .bind(bp.last_delivered_at)
        .bind(to_i64(bp.total_deliveries))
        .bind(to_i64(bp.total_jobs_matched))
        .bind(bp.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;
        Ok(())
    }

    async fn modify<F>(&self, op: &'static str, id: BlueprintId, f: F) -> Result<Blueprint, BlueprintStoreError>
    where
        F: FnOnce(&mut Blueprint) + Send,
    {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error(op, e))?;
        let mut bp = Self::lock(&mut tx, op, id).await?;
        f(&mut bp);
        Self::save(&mut tx, op, &bp).await?;
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(bp)
    }

    async fn select_where(
        &self,
        op: &'static str,
        clause: &str,
        owner: Option<OwnerId>,
    ) -> Result<Vec<Blueprint>, BlueprintStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLUEPRINT_COLUMNS} FROM blueprints WHERE {clause} ORDER BY created_at"
        ))
        .bind(owner.map(Uuid::from))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;
        rows.iter().map(blueprint_from_row).collect()
    }
}

#[async_trait]
impl BlueprintStore for PostgresBlueprintStore {
    async fn create(&self, bp: Blueprint) -> Result<Blueprint, BlueprintStoreError> {
        sqlx::query(&format!(
            "INSERT INTO blueprints ({BLUEPRINT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(bp.id.as_uuid())
        .bind(bp.owner.as_uuid())
        .bind(&bp.name)
        .bind(enum_text(&bp.portal)?)
        .bind(json(&bp.filters)?)
        .bind(to_i64(bp.frequency_secs))
        .bind(enum_text(&bp.status)?)
        .bind(bp.is_active)
        .bind(bp.snoozed_until)
        .bind(bp.last_delivered_at)
        .bind(to_i64(bp.total_deliveries))
        .bind(to_i64(bp.total_jobs_matched))
        .bind(bp.created_at)
        .bind(bp.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;
        Ok(bp)
    }

    async fn get(&self, id: BlueprintId) -> Result<Option<Blueprint>, BlueprintStoreError> {
        let row = sqlx::query(&format!("SELECT {BLUEPRINT_COLUMNS} FROM blueprints WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(blueprint_from_row).transpose()
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<Blueprint>, BlueprintStoreError> {
        self.select_where("list_for_owner", "owner_id = $1", Some(owner)).await
    }

    async fn list_active(&self) -> Result<Vec<Blueprint>, BlueprintStoreError> {
        self.select_where("list_active", "is_active AND ($1::uuid IS NULL OR owner_id = $1)", None)
            .await
    }

    async fn update(
        &self,
        id: BlueprintId,
        patch: BlueprintPatch,
        now: DateTime<Utc>,
    ) -> Result<BlueprintUpdate, BlueprintStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("update", e))?;
        let previous = Self::lock(&mut tx, "update", id).await?;
        let mut current = previous.clone();
        current.apply_patch(patch, now)?;
        Self::save(&mut tx, "update", &current).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("update", e))?;
        Ok(BlueprintUpdate { previous, current })
    }

    async fn record_delivery(
        &self,
        id: BlueprintId,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintStoreError> {
        self.modify("record_delivery", id, |bp| bp.record_delivery(now)).await
    }

    async fn record_matches(
        &self,
        id: BlueprintId,
        jobs: u64,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintStoreError> {
        self.modify("record_matches", id, |bp| bp.record_matches(jobs, now)).await
    }
}

fn blueprint_from_row(row: &sqlx::postgres::PgRow) -> Result<Blueprint, BlueprintStoreError> {
    let decode = |e: sqlx::Error| BlueprintStoreError::Storage(format!("failed to decode blueprint row: {e}"));
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let owner: Uuid = row.try_get("owner_id").map_err(decode)?;
    let portal: String = row.try_get("portal").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let filters: JsonValue = row.try_get("filters").map_err(decode)?;
    let frequency_secs: i64 = row.try_get("frequency_secs").map_err(decode)?;
    let total_deliveries: i64 = row.try_get("total_deliveries").map_err(decode)?;
    let total_jobs_matched: i64 = row.try_get("total_jobs_matched").map_err(decode)?;

    Ok(Blueprint {
        id: BlueprintId::from_uuid(id),
        owner: OwnerId::from_uuid(owner),
        name: row.try_get("name").map_err(decode)?,
        portal: from_json(JsonValue::String(portal))?,
        filters: from_json(filters)?,
        frequency_secs: frequency_secs.max(0) as u64,
        status: from_json(JsonValue::String(status))?,
        is_active: row.try_get("is_active").map_err(decode)?,
        snoozed_until: row.try_get("snoozed_until").map_err(decode)?,
        last_delivered_at: row.try_get("last_delivered_at").map_err(decode)?,
        total_deliveries: total_deliveries.max(0) as u64,
        total_jobs_matched: total_jobs_matched.max(0) as u64,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn json<T: Serialize>(value: &T) -> Result<JsonValue, BlueprintStoreError> {
    serde_json::to_value(value).map_err(|e| BlueprintStoreError::Storage(format!("encode: {e}")))
}

fn enum_text<T: Serialize>(value: &T) -> Result<String, BlueprintStoreError> {
    match json(value)? {
        JsonValue::String(s) => Ok(s),
        other => Err(BlueprintStoreError::Storage(format!("expected a string, got {other}"))),
    }
}

fn from_json<T: DeserializeOwned>(value: JsonValue) -> Result<T, BlueprintStoreError> {
    serde_json::from_value(value)
        .map_err(|e| BlueprintStoreError::Storage(format!("corrupt blueprint row: {e}")))
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> BlueprintStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            BlueprintStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            BlueprintStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => BlueprintStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
