//! Workflow run checkpoint repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use thumbsmith_core::models::{GenerationRequest, RunFailure, RunState, WorkflowCheckpoint};

use super::traits::CheckpointStore;

#[derive(Debug, FromRow)]
struct WorkflowRunRow {
    id: Uuid,
    owner_id: String,
    record_id: String,
    prompt: String,
    step: String,
    status: String,
    state: serde_json::Value,
    failure: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRunRow> for WorkflowCheckpoint {
    type Error = anyhow::Error;

    fn try_from(row: WorkflowRunRow) -> Result<Self> {
        let state: RunState =
            serde_json::from_value(row.state).context("Failed to decode run state")?;
        let failure: Option<RunFailure> = row
            .failure
            .map(serde_json::from_value)
            .transpose()
            .context("Failed to decode run failure")?;

        Ok(WorkflowCheckpoint {
            run_id: row.id,
            request: GenerationRequest {
                owner_id: row.owner_id,
                record_id: row.record_id,
                prompt: row.prompt,
            },
            step: row.step.parse()?,
            status: row.status.parse()?,
            state,
            failure,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct CheckpointRepository {
    pool: PgPool,
}

impl CheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for CheckpointRepository {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let state =
            serde_json::to_value(&checkpoint.state).context("Failed to encode run state")?;
        let failure = checkpoint
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to encode run failure")?;

        sqlx::query(
            r#"
            INSERT INTO thumbnail_workflow_runs (
                id, owner_id, record_id, prompt, step, status, state, failure,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET step = EXCLUDED.step,
                status = EXCLUDED.status,
                state = EXCLUDED.state,
                failure = EXCLUDED.failure,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(checkpoint.run_id)
        .bind(&checkpoint.request.owner_id)
        .bind(&checkpoint.request.record_id)
        .bind(&checkpoint.request.prompt)
        .bind(checkpoint.step.to_string())
        .bind(checkpoint.status.to_string())
        .bind(state)
        .bind(failure)
        .bind(checkpoint.created_at)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save workflow checkpoint")?;

        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<WorkflowCheckpoint>> {
        let row = sqlx::query_as::<Postgres, WorkflowRunRow>(
            r#"
            SELECT id, owner_id, record_id, prompt, step, status, state, failure,
                created_at, updated_at
            FROM thumbnail_workflow_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load workflow checkpoint")?;

        row.map(WorkflowCheckpoint::try_from).transpose()
    }

    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowCheckpoint>> {
        let rows = sqlx::query_as::<Postgres, WorkflowRunRow>(
            r#"
            SELECT id, owner_id, record_id, prompt, step, status, state, failure,
                created_at, updated_at
            FROM thumbnail_workflow_runs
            WHERE status IN ('pending', 'running')
              AND updated_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unfinished workflow runs")?;

        rows.into_iter().map(WorkflowCheckpoint::try_from).collect()
    }
}
