use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thumbsmith_core::models::{ArtifactSwap, TargetRecord, UploadedArtifact, WorkflowCheckpoint};
use uuid::Uuid;

/// Point read and conditional update of the record a thumbnail belongs to.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load a record by id, scoped to its owner. `None` if absent or owned by someone else.
    async fn load(&self, record_id: &str, owner_id: &str) -> Result<Option<TargetRecord>>;

    /// Point the record at `artifact`, guarded by `(record_id, owner_id)`.
    ///
    /// Returns the number of rows updated (0 when the record vanished or changed
    /// owner) and the artifact key the record held right before the update.
    async fn swap_artifact(
        &self,
        record_id: &str,
        owner_id: &str,
        artifact: &UploadedArtifact,
    ) -> Result<ArtifactSwap>;
}

/// Durable storage of workflow run checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite the checkpoint of a run.
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()>;

    async fn load(&self, run_id: Uuid) -> Result<Option<WorkflowCheckpoint>>;

    /// Runs that are pending or running and were last saved at or before
    /// `updated_before`, oldest first.
    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowCheckpoint>>;
}

/// Result of trying to take a record lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseClaim {
    Acquired,
    /// A live lease belongs to another holder. `run_id` is the run it drives,
    /// when the row was still there to read.
    Held { run_id: Option<Uuid> },
}

/// Advisory per-record lease held by one driver at a time.
///
/// `holder` identifies a single attempt to drive a run, not the run itself: two
/// processes resuming the same run hold different tokens and exclude each other.
#[async_trait]
pub trait RecordLease: Send + Sync {
    /// Take the lease for `run_id`. Succeeds when no live lease exists, the
    /// existing one expired, or `holder` already owns it.
    async fn acquire(
        &self,
        record_id: &str,
        run_id: Uuid,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<LeaseClaim>;

    /// Push the expiry out by `ttl`. `false` when `holder` no longer owns the lease.
    async fn renew(&self, record_id: &str, holder: Uuid, ttl: Duration) -> Result<bool>;

    /// Release the lease if `holder` owns it.
    async fn release(&self, record_id: &str, holder: Uuid) -> Result<()>;
}
