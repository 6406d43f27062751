//! Runtime schema bootstrap. Both tables are idempotent to create, so the
//! store can be pointed at a fresh database without a migration step.

use crate::DbPool;

pub async fn ensure_schema(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS execution_state (
            execution_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            state_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_event (
            event_id TEXT PRIMARY KEY,
            execution_id TEXT,
            step_id TEXT,
            event_type TEXT NOT NULL,
            event_json TEXT NOT NULL,
            occurred_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_event_execution
         ON audit_event (execution_id, occurred_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
