//! Postgres connection pool and schema bootstrap.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Statements run in order on startup. Each is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id             UUID PRIMARY KEY,
        owner_id       UUID NOT NULL,
        task_type      TEXT NOT NULL,
        status         TEXT NOT NULL,
        priority       INTEGER NOT NULL DEFAULT 0,
        payload        JSONB NOT NULL,
        result         JSONB NULL,
        error_log      TEXT NULL,
        assigned_agent TEXT NULL,
        blueprint_id   UUID NULL,
        created_at     TIMESTAMPTZ NOT NULL,
        updated_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    // At most one non-terminal task per (blueprint, type).
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tasks_one_active_per_blueprint_type
        ON tasks (blueprint_id, task_type)
        WHERE blueprint_id IS NOT NULL AND status IN ('PENDING', 'IN_PROGRESS')
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tasks_claim_order
        ON tasks (owner_id, priority DESC, created_at ASC)
        WHERE status = 'PENDING'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id                  UUID PRIMARY KEY,
        owner_id            UUID NOT NULL,
        agent_id            TEXT NOT NULL UNIQUE,
        name                TEXT NULL,
        status              TEXT NOT NULL,
        metadata            JSONB NOT NULL DEFAULT '{}'::jsonb,
        active_tasks        INTEGER NOT NULL DEFAULT 0,
        last_heartbeat      TIMESTAMPTZ NULL,
        tasks_this_hour     INTEGER NOT NULL DEFAULT 0,
        max_tasks_per_hour  INTEGER NOT NULL,
        rate_limit_reset_at TIMESTAMPTZ NOT NULL,
        created_at          TIMESTAMPTZ NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blueprints (
        id                 UUID PRIMARY KEY,
        owner_id           UUID NOT NULL,
        name               TEXT NOT NULL,
        portal             TEXT NOT NULL,
        filters            JSONB NOT NULL,
        frequency_secs     BIGINT NOT NULL CHECK (frequency_secs > 0),
        status             TEXT NOT NULL,
        is_active          BOOLEAN NOT NULL,
        snoozed_until      TIMESTAMPTZ NULL,
        last_delivered_at  TIMESTAMPTZ NULL,
        total_deliveries   BIGINT NOT NULL DEFAULT 0,
        total_jobs_matched BIGINT NOT NULL DEFAULT 0,
        created_at         TIMESTAMPTZ NOT NULL,
        updated_at         TIMESTAMPTZ NOT NULL
    )
    "#,
];

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "database schema ready");
    Ok(())
}
