//! Append-only audit log keyed by run id.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::Row;

use waypoint_core::audit::AuditEvent;
use waypoint_core::domain::execution::ExecutionId;

use crate::state_store::StoreError;
use crate::DbPool;

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), StoreError>;
    async fn events_for_run(&self, id: &ExecutionId) -> Result<Vec<AuditEvent>, StoreError>;
}

pub struct SqlAuditLog {
    pool: DbPool,
}

impl SqlAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for SqlAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let event_json = serde_json::to_string(event)
            .map_err(|err| StoreError::Decode(err.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_event
                 (event_id, execution_id, step_id, event_type, event_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.execution_id.as_ref().map(|id| id.0.as_str()))
        .bind(event.step_id.as_deref())
        .bind(&event.event_type)
        .bind(event_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn events_for_run(&self, id: &ExecutionId) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_json FROM audit_event
             WHERE execution_id = ?
             ORDER BY occurred_at, rowid",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let event_json: String = row.get("event_json");
                serde_json::from_str(&event_json)
                    .map_err(|err| StoreError::Decode(err.to_string()))
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditLog {
    pub fn all_events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }

    async fn events_for_run(&self, id: &ExecutionId) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .all_events()
            .into_iter()
            .filter(|event| event.execution_id.as_ref() == Some(id))
            .collect())
    }
}
