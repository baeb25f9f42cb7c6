//! Thumbnail workflow orchestrator.
//!
//! A run executes `LoadTarget → CreateJob → Poll → Extract → Upload → Commit →
//! Cleanup`. The checkpoint stores the next step to execute and is saved after
//! every step, so a run interrupted at step N resumes at step N.
//!
//! Side-effect ordering: the superseded artifact is deleted only after the record
//! update that replaces it has committed, and the record is never written on a
//! failed run.
//!
//! Each drive of a run takes the record lease under a fresh holder token before
//! it loads anything, renews it after every step, and stops without writing the
//! checkpoint once the lease is gone.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use thumbsmith_core::models::{
    GenerationParams, GenerationRequest, JobStatus, RunOutcome, WorkflowCheckpoint, WorkflowStep,
};
use thumbsmith_core::{constants, ErrorMetadata, LogLevel, WorkflowConfig, WorkflowError};
use thumbsmith_db::{CheckpointStore, LeaseClaim, RecordLease, RecordStore};
use thumbsmith_generation::{extract_output_url, GenerationClientError, GenerationService};
use thumbsmith_storage::ArtifactStore;

pub struct ThumbnailWorkflow {
    records: Arc<dyn RecordStore>,
    generation: Arc<dyn GenerationService>,
    artifacts: Arc<dyn ArtifactStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    leases: Arc<dyn RecordLease>,
    config: WorkflowConfig,
    width: u32,
    height: u32,
}

impl ThumbnailWorkflow {
    pub fn new(
        records: Arc<dyn RecordStore>,
        generation: Arc<dyn GenerationService>,
        artifacts: Arc<dyn ArtifactStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        leases: Arc<dyn RecordLease>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            records,
            generation,
            artifacts,
            checkpoints,
            leases,
            config,
            width: constants::THUMBNAIL_WIDTH,
            height: constants::THUMBNAIL_HEIGHT,
        }
    }

    /// Override the requested image geometry.
    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Persist a new run and drive it to completion.
    pub async fn run(&self, request: GenerationRequest) -> Result<RunOutcome, WorkflowError> {
        let checkpoint = self.create_run(request).await?;
        self.drive(checkpoint).await
    }

    /// Persist a new run without executing it. Returns the run id.
    pub async fn start(&self, request: GenerationRequest) -> Result<Uuid, WorkflowError> {
        let checkpoint = self.create_run(request).await?;
        Ok(checkpoint.run_id)
    }

    /// Continue a persisted run from its step cursor.
    ///
    /// A finished run is not executed again: a completed run returns its outcome
    /// and a failed run returns the error it failed with.
    pub async fn resume(&self, run_id: Uuid) -> Result<RunOutcome, WorkflowError> {
        let checkpoint = self
            .checkpoint(run_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow run {}", run_id)))?;

        if let Some(outcome) = checkpoint.outcome() {
            return outcome;
        }

        self.drive(checkpoint).await
    }

    pub async fn checkpoint(
        &self,
        run_id: Uuid,
    ) -> Result<Option<WorkflowCheckpoint>, WorkflowError> {
        self.checkpoints
            .load(run_id)
            .await
            .context("Failed to load workflow checkpoint")
            .map_err(WorkflowError::from)
    }

    /// Runs left pending or running and last saved at or before `updated_before`,
    /// oldest first.
    pub async fn unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowCheckpoint>, WorkflowError> {
        self.checkpoints
            .list_unfinished(updated_before, limit)
            .await
            .context("Failed to list unfinished workflow runs")
            .map_err(WorkflowError::from)
    }

    async fn create_run(
        &self,
        request: GenerationRequest,
    ) -> Result<WorkflowCheckpoint, WorkflowError> {
        let checkpoint = WorkflowCheckpoint::new(request);
        self.save(&checkpoint).await?;

        tracing::info!(
            run_id = %checkpoint.run_id,
            record_id = %checkpoint.request.record_id,
            owner_id = %checkpoint.request.owner_id,
            "Thumbnail workflow run created"
        );

        Ok(checkpoint)
    }

    #[tracing::instrument(
        skip(self, checkpoint),
        fields(run_id = %checkpoint.run_id, record_id = %checkpoint.request.record_id)
    )]
    async fn drive(&self, checkpoint: WorkflowCheckpoint) -> Result<RunOutcome, WorkflowError> {
        let start = Instant::now();
        let run_id = checkpoint.run_id;
        let record_id = checkpoint.request.record_id.clone();
        let holder = Uuid::new_v4();

        let claim = self
            .leases
            .acquire(&record_id, run_id, holder, self.config.lease_ttl())
            .await;

        match claim {
            Ok(LeaseClaim::Acquired) => {}
            Ok(LeaseClaim::Held {
                run_id: Some(other),
            }) if other != run_id => {
                let err = WorkflowError::RecordBusy(format!(
                    "video {} already has a thumbnail run in progress",
                    record_id
                ));
                return self.finish(checkpoint, Err(err), start).await;
            }
            Ok(LeaseClaim::Held { .. }) => {
                // Another drive of this same run: leave the checkpoint to it.
                tracing::info!("Workflow run is already being driven");
                return Err(WorkflowError::RecordBusy(format!(
                    "run {} is already being driven",
                    run_id
                )));
            }
            Err(e) => {
                let err = WorkflowError::from(e.context("Failed to acquire record lease"));
                return self.finish(checkpoint, Err(err), start).await;
            }
        }

        let result = self.drive_leased(checkpoint, holder, start).await;

        if let Err(e) = self.leases.release(&record_id, holder).await {
            tracing::warn!(error = %e, "Failed to release record lease");
        }
        result
    }

    async fn drive_leased(
        &self,
        checkpoint: WorkflowCheckpoint,
        holder: Uuid,
        start: Instant,
    ) -> Result<RunOutcome, WorkflowError> {
        // A previous holder may have moved the run on since it was read.
        let mut checkpoint = match self.checkpoint(checkpoint.run_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => checkpoint,
            Err(err) => return self.finish(checkpoint, Err(err), start).await,
        };
        if let Some(outcome) = checkpoint.outcome() {
            return outcome;
        }

        match self.execute(&mut checkpoint, holder).await {
            Ok(()) => self.finish(checkpoint, Ok(()), start).await,
            Err(Halt::Failed(err)) => self.finish(checkpoint, Err(err), start).await,
            Err(Halt::Superseded(err)) => {
                tracing::warn!(
                    step = %checkpoint.step,
                    error = %err,
                    "Record lease lost; run left for recovery"
                );
                Err(err)
            }
        }
    }

    /// Persist the terminal status and report it.
    async fn finish(
        &self,
        mut checkpoint: WorkflowCheckpoint,
        result: Result<(), WorkflowError>,
        start: Instant,
    ) -> Result<RunOutcome, WorkflowError> {
        match &result {
            Ok(()) => checkpoint.mark_completed(),
            Err(err) => checkpoint.mark_failed(err),
        }

        // The run's effects are already applied; a lost final save only means
        // recovery will replay the last step.
        if let Err(e) = self.save(&checkpoint).await {
            tracing::error!(error = %e, "Failed to persist final workflow state");
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(()) => {
                tracing::info!(
                    duration_ms = duration_ms,
                    cleanup_failed = checkpoint.state.cleanup_error.is_some(),
                    "Thumbnail workflow completed"
                );
                checkpoint.outcome().unwrap_or_else(|| {
                    Err(WorkflowError::Internal(format!(
                        "run {} finished without an outcome",
                        checkpoint.run_id
                    )))
                })
            }
            Err(err) => {
                log_failure(&checkpoint, &err, duration_ms);
                Err(err)
            }
        }
    }

    async fn execute(&self, checkpoint: &mut WorkflowCheckpoint, holder: Uuid) -> Result<(), Halt> {
        checkpoint.mark_running();
        self.save(checkpoint).await?;

        while checkpoint.step != WorkflowStep::Done {
            let step = checkpoint.step;
            let step_start = Instant::now();

            match step {
                WorkflowStep::LoadTarget => self.load_target(checkpoint).await?,
                WorkflowStep::CreateJob => self.create_job(checkpoint).await?,
                WorkflowStep::Poll => self.poll_to_terminal(checkpoint).await?,
                WorkflowStep::Extract => self.extract_output(checkpoint)?,
                WorkflowStep::Upload => self.upload(checkpoint).await?,
                WorkflowStep::Commit => self.commit(checkpoint).await?,
                WorkflowStep::Cleanup => self.cleanup(checkpoint).await,
                WorkflowStep::Done => {}
            }

            self.renew_lease(checkpoint, holder).await?;
            checkpoint.advance();
            if checkpoint.step != WorkflowStep::Done {
                self.save(checkpoint).await?;
            }

            tracing::debug!(
                step = %step,
                duration_ms = step_start.elapsed().as_secs_f64() * 1000.0,
                "Workflow step completed"
            );
        }

        Ok(())
    }

    async fn renew_lease(
        &self,
        checkpoint: &WorkflowCheckpoint,
        holder: Uuid,
    ) -> Result<(), Halt> {
        let record_id = &checkpoint.request.record_id;
        let renewed = self
            .leases
            .renew(record_id, holder, self.config.lease_ttl())
            .await
            .context("Failed to renew record lease")
            .map_err(WorkflowError::from)?;

        if !renewed {
            return Err(Halt::Superseded(WorkflowError::RecordBusy(format!(
                "lost the lease on video {} during {}",
                record_id, checkpoint.step
            ))));
        }
        Ok(())
    }

    async fn load_target(&self, checkpoint: &mut WorkflowCheckpoint) -> Result<(), WorkflowError> {
        let request = &checkpoint.request;
        let record = self
            .records
            .load(&request.record_id, &request.owner_id)
            .await
            .context("Failed to load video")?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!(
                    "video {} not found for user {}",
                    request.record_id, request.owner_id
                ))
            })?;

        checkpoint.state.previous_artifact_key = record.current_artifact_key;
        Ok(())
    }

    async fn create_job(&self, checkpoint: &mut WorkflowCheckpoint) -> Result<(), WorkflowError> {
        let params = GenerationParams::thumbnail(checkpoint.request.prompt.clone())
            .with_size(self.width, self.height);

        let job = self
            .generation
            .create_job(&params)
            .await
            .map_err(|e| upstream_error("Replicate create failed", e))?;

        tracing::info!(job_id = %job.id, status = %job.status, "Generation job created");

        checkpoint.state.job = Some(job);
        checkpoint.state.job_created_at = Some(Utc::now());
        Ok(())
    }

    /// Poll until the job is terminal or the budget measured from job creation runs out.
    async fn poll_to_terminal(
        &self,
        checkpoint: &mut WorkflowCheckpoint,
    ) -> Result<(), WorkflowError> {
        let run_id = checkpoint.run_id;
        let mut job = checkpoint
            .state
            .job
            .clone()
            .ok_or_else(|| missing_state(run_id, "a job"))?;
        let created_at = checkpoint.state.job_created_at.unwrap_or(checkpoint.created_at);

        let elapsed_ms = (Utc::now() - created_at).num_milliseconds().max(0) as u64;
        let remaining = self
            .config
            .poll_timeout()
            .saturating_sub(Duration::from_millis(elapsed_ms));
        let interval = self.config.poll_interval();
        let max_polls = polls_within(remaining, interval);
        let deadline = Instant::now() + remaining;
        let mut polls = 0u64;

        while !job.status.is_terminal() {
            if polls >= max_polls {
                break;
            }
            tokio::time::sleep(interval).await;
            if Instant::now() > deadline {
                break;
            }

            polls += 1;
            job = self
                .generation
                .get_job(&job.id)
                .await
                .map_err(|e| upstream_error("Replicate poll failed", e))?;

            tracing::debug!(
                job_id = %job.id,
                status = %job.status,
                attempts = polls,
                "Polled generation job"
            );
        }

        checkpoint.state.job = Some(job.clone());

        if !job.status.is_terminal() {
            return Err(WorkflowError::Timeout(format!(
                "job {} still {} after {}ms ({} polls)",
                job.id, job.status, self.config.poll_timeout_ms, polls
            )));
        }

        if job.status != JobStatus::Succeeded {
            return Err(WorkflowError::GenerationFailed {
                reason: job.failure_reason(),
            });
        }

        tracing::info!(job_id = %job.id, attempts = polls, "Generation job succeeded");
        Ok(())
    }

    fn extract_output(&self, checkpoint: &mut WorkflowCheckpoint) -> Result<(), WorkflowError> {
        let run_id = checkpoint.run_id;
        let job = checkpoint
            .state
            .job
            .as_ref()
            .ok_or_else(|| missing_state(run_id, "a job"))?;

        let url = extract_output_url(job.output.as_ref()).ok_or_else(|| {
            WorkflowError::NoOutput(format!("job {} returned no usable image URL", job.id))
        })?;

        checkpoint.state.output_url = Some(url);
        Ok(())
    }

    async fn upload(&self, checkpoint: &mut WorkflowCheckpoint) -> Result<(), WorkflowError> {
        let run_id = checkpoint.run_id;
        let url = checkpoint
            .state
            .output_url
            .as_deref()
            .ok_or_else(|| missing_state(run_id, "an output URL"))?;

        let artifact = self
            .artifacts
            .ingest_from_url(url)
            .await
            .map_err(|e| WorkflowError::UploadFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                WorkflowError::UploadFailed("object store returned no file".to_string())
            })?;

        tracing::info!(storage_key = %artifact.key, "Thumbnail uploaded");

        checkpoint.state.artifact = Some(artifact);
        Ok(())
    }

    async fn commit(&self, checkpoint: &mut WorkflowCheckpoint) -> Result<(), WorkflowError> {
        let request = &checkpoint.request;
        let artifact = checkpoint
            .state
            .artifact
            .as_ref()
            .ok_or_else(|| missing_state(checkpoint.run_id, "an artifact"))?;

        let swap = self
            .records
            .swap_artifact(&request.record_id, &request.owner_id, artifact)
            .await
            .context("Failed to update video thumbnail")?;

        if !swap.applied() {
            // The uploaded artifact stays orphaned.
            return Err(WorkflowError::ConcurrentModification(format!(
                "video {} was deleted or reassigned before commit; {} left orphaned",
                request.record_id, artifact.key
            )));
        }

        if swap.previous_key != checkpoint.state.previous_artifact_key
            && swap.previous_key.as_deref() != Some(artifact.key.as_str())
        {
            tracing::warn!(
                loaded_key = ?checkpoint.state.previous_artifact_key,
                replaced_key = ?swap.previous_key,
                "Thumbnail changed between load and commit"
            );
        }

        tracing::info!(storage_key = %artifact.key, "Video thumbnail updated");
        Ok(())
    }

    /// Best-effort removal of the superseded artifact. Never fails the run.
    async fn cleanup(&self, checkpoint: &mut WorkflowCheckpoint) {
        let Some(previous) = checkpoint.state.previous_artifact_key.clone() else {
            return;
        };
        let committed = checkpoint.state.artifact.as_ref().map(|a| a.key.as_str());
        if committed == Some(previous.as_str()) {
            return;
        }

        match self.artifacts.delete(&previous).await {
            Ok(()) => {
                tracing::info!(storage_key = %previous, "Previous thumbnail deleted");
            }
            Err(e) => {
                tracing::warn!(
                    storage_key = %previous,
                    error = %e,
                    "Failed to delete previous thumbnail"
                );
                checkpoint.state.cleanup_error = Some(e.to_string());
            }
        }
    }

    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), WorkflowError> {
        self.checkpoints
            .save(checkpoint)
            .await
            .context("Failed to save workflow checkpoint")
            .map_err(WorkflowError::from)
    }
}

/// Why a leased drive stopped before `Done`.
enum Halt {
    /// The run failed; its checkpoint is marked failed.
    Failed(WorkflowError),
    /// The lease moved to another holder, which now owns the checkpoint.
    Superseded(WorkflowError),
}

impl From<WorkflowError> for Halt {
    fn from(err: WorkflowError) -> Self {
        Halt::Failed(err)
    }
}

/// A checkpoint whose cursor is ahead of the state it needs.
fn missing_state(run_id: Uuid, what: &str) -> WorkflowError {
    WorkflowError::Internal(format!("run {} has no record of {}", run_id, what))
}

/// ceil(remaining / interval)
fn polls_within(remaining: Duration, interval: Duration) -> u64 {
    let interval_ms = interval.as_millis().max(1);
    remaining.as_millis().div_ceil(interval_ms) as u64
}

fn upstream_error(context: &str, err: GenerationClientError) -> WorkflowError {
    match err {
        GenerationClientError::UnrecognizedStatus(status) => {
            WorkflowError::UnrecognizedStatus(status)
        }
        other => WorkflowError::UpstreamUnavailable(format!("{}: {}", context, other)),
    }
}

fn log_failure(checkpoint: &WorkflowCheckpoint, err: &WorkflowError, duration_ms: f64) {
    let step = checkpoint.step;
    let kind = err.kind();
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(
            step = %step,
            error_kind = %kind,
            error = %err,
            duration_ms = duration_ms,
            "Thumbnail workflow failed"
        ),
        LogLevel::Warn => tracing::warn!(
            step = %step,
            error_kind = %kind,
            error = %err,
            duration_ms = duration_ms,
            "Thumbnail workflow failed"
        ),
        LogLevel::Error => tracing::error!(
            step = %step,
            error_kind = %kind,
            error = %err,
            duration_ms = duration_ms,
            "Thumbnail workflow failed"
        ),
    }
}
