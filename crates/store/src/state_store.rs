//! Persistence contract for execution state: a last-write-wins key-value
//! store with per-key atomicity. The engine saves after every transition, so
//! `save` must stay cheap and idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use thiserror::Error;

use waypoint_core::domain::execution::{ExecutionId, ExecutionState};

use crate::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &ExecutionState) -> Result<(), StoreError>;
    async fn load(&self, id: &ExecutionId) -> Result<Option<ExecutionState>, StoreError>;

    /// TTL expiry of terminal states. Non-terminal states are never purged.
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct SqlStateStore {
    pool: DbPool,
}

impl SqlStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    async fn save(&self, state: &ExecutionState) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(state)
            .map_err(|err| StoreError::Decode(err.to_string()))?;

        sqlx::query(
            "INSERT INTO execution_state (execution_id, status, state_json, updated_at, completed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (execution_id) DO UPDATE SET
                 status = excluded.status,
                 state_json = excluded.state_json,
                 updated_at = excluded.updated_at,
                 completed_at = excluded.completed_at",
        )
        .bind(&state.execution_id.0)
        .bind(state.status.as_str())
        .bind(state_json)
        .bind(state.updated_at.to_rfc3339())
        .bind(state.completed_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, id: &ExecutionId) -> Result<Option<ExecutionState>, StoreError> {
        let row = sqlx::query("SELECT state_json FROM execution_state WHERE execution_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let state_json: String = row.get("state_json");
            serde_json::from_str(&state_json).map_err(|err| StoreError::Decode(err.to_string()))
        })
        .transpose()
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM execution_state
             WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED')
               AND updated_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    states: Arc<Mutex<HashMap<String, ExecutionState>>>,
}

impl InMemoryStateStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ExecutionState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &ExecutionState) -> Result<(), StoreError> {
        self.lock().insert(state.execution_id.0.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, id: &ExecutionId) -> Result<Option<ExecutionState>, StoreError> {
        Ok(self.lock().get(&id.0).cloned())
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut states = self.lock();
        let before = states.len();
        states.retain(|_, state| !(state.status.is_terminal() && state.updated_at < cutoff));
        Ok((before - states.len()) as u64)
    }
}
