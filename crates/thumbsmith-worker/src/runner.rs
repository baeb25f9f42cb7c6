//! Background execution of workflow runs.
//!
//! Submitted runs are persisted first, then queued in memory and driven by a
//! dispatcher that holds at most `max_concurrent_runs` runs in flight. Anything
//! still queued at shutdown stays persisted as `pending` and is picked up by
//! [`WorkflowRunner::recover_unfinished`] on the next start.
//!
//! A periodic sweep re-queues runs whose checkpoint has not been saved for a
//! whole lease TTL. Their driver is gone (a live driver saves after every step),
//! so another process can take them over.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use thumbsmith_core::models::GenerationRequest;
use thumbsmith_core::WorkflowError;

use crate::ThumbnailWorkflow;

/// Maximum number of unfinished runs picked up by one recovery pass.
pub const RECOVERY_BATCH_SIZE: i64 = 1000;

pub struct WorkflowRunner {
    workflow: Arc<ThumbnailWorkflow>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    shutdown_tx: mpsc::Sender<()>,
    sweep_shutdown_tx: Option<mpsc::Sender<()>>,
    /// One permit per run in flight.
    slots: Arc<Semaphore>,
    max_concurrent_runs: usize,
}

impl WorkflowRunner {
    /// Spawn the dispatcher and, unless disabled, the stale run sweep. Must be
    /// called from within a Tokio runtime.
    pub fn new(workflow: Arc<ThumbnailWorkflow>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let max_concurrent_runs = workflow.config().max_concurrent_runs.max(1);
        let slots = Arc::new(Semaphore::new(max_concurrent_runs));

        tokio::spawn(Self::dispatch(
            workflow.clone(),
            slots.clone(),
            queue_rx,
            shutdown_rx,
        ));

        let sweep_shutdown_tx = workflow.config().recovery_interval().map(|period| {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(Self::sweep(
                workflow.clone(),
                queue_tx.clone(),
                period,
                rx,
            ));
            tx
        });

        Self {
            workflow,
            queue_tx,
            shutdown_tx,
            sweep_shutdown_tx,
            slots,
            max_concurrent_runs,
        }
    }

    pub fn workflow(&self) -> &Arc<ThumbnailWorkflow> {
        &self.workflow
    }

    /// Persist a new run and queue it. Returns as soon as the run is durable.
    #[tracing::instrument(skip(self, request), fields(record_id = %request.record_id))]
    pub async fn submit(&self, request: GenerationRequest) -> Result<Uuid, WorkflowError> {
        let run_id = self.workflow.start(request).await?;
        self.enqueue(run_id)?;
        Ok(run_id)
    }

    /// Queue every run left pending or running by a previous process.
    ///
    /// Call once at startup, before new submissions. A run picked up while another
    /// process still drives it is turned away by the record lease.
    pub async fn recover_unfinished(&self) -> Result<usize, WorkflowError> {
        requeue(&self.workflow, &self.queue_tx, Utc::now()).await
    }

    /// Stop dispatching and sweeping, then wait up to the shutdown grace period
    /// for runs in flight. Runs still in flight after that are abandoned mid-step
    /// and resumed from their checkpoint later.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(tx) = &self.sweep_shutdown_tx {
            let _ = tx.send(()).await;
        }

        let grace = self.workflow.config().shutdown_grace();
        let all_slots = self.max_concurrent_runs as u32;
        match tokio::time::timeout(grace, self.slots.acquire_many(all_slots)).await {
            Ok(_) => tracing::info!("All in-flight workflow runs finished"),
            Err(_) => tracing::warn!(
                in_flight = self.in_flight(),
                grace_secs = grace.as_secs(),
                "Shutdown grace period elapsed with workflow runs in flight"
            ),
        }
    }

    /// Runs currently being driven.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent_runs
            .saturating_sub(self.slots.available_permits())
    }

    fn enqueue(&self, run_id: Uuid) -> Result<(), WorkflowError> {
        self.queue_tx
            .send(run_id)
            .map_err(|_| WorkflowError::Internal("workflow runner is shut down".to_string()))
    }

    async fn sweep(
        workflow: Arc<ThumbnailWorkflow>,
        queue_tx: mpsc::UnboundedSender<Uuid>,
        period: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        // Startup recovery covers the first period.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match requeue(&workflow, &queue_tx, stale_cutoff(&workflow)).await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count = count, "Stale workflow runs re-queued"),
                        Err(e) => tracing::error!(error = %e, "Stale workflow run sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    async fn dispatch(
        workflow: Arc<ThumbnailWorkflow>,
        semaphore: Arc<Semaphore>,
        mut queue_rx: mpsc::UnboundedReceiver<Uuid>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_concurrent_runs = semaphore.available_permits(),
            max_polls = workflow.config().max_polls(),
            "Workflow runner started"
        );

        loop {
            let run_id = tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Workflow runner shutting down");
                    break;
                }
                next = queue_rx.recv() => match next {
                    Some(run_id) => run_id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(run_id = %run_id, "Workflow runner shutting down; run stays queued");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let workflow = workflow.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match workflow.resume(run_id).await {
                    Ok(outcome) => {
                        tracing::debug!(
                            run_id = %run_id,
                            storage_key = %outcome.artifact.key,
                            "Background workflow run finished"
                        );
                    }
                    Err(e) => {
                        // Already logged by the workflow at the error's own level.
                        tracing::debug!(run_id = %run_id, error = %e, "Background workflow run failed");
                    }
                }
            });
        }
    }
}

/// Checkpoints saved before this have outlived any lease their driver held.
fn stale_cutoff(workflow: &ThumbnailWorkflow) -> DateTime<Utc> {
    chrono::Duration::from_std(workflow.config().lease_ttl())
        .ok()
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn requeue(
    workflow: &ThumbnailWorkflow,
    queue_tx: &mpsc::UnboundedSender<Uuid>,
    updated_before: DateTime<Utc>,
) -> Result<usize, WorkflowError> {
    let runs = workflow
        .unfinished(updated_before, RECOVERY_BATCH_SIZE)
        .await?;
    let count = runs.len();

    for checkpoint in runs {
        tracing::info!(
            run_id = %checkpoint.run_id,
            step = %checkpoint.step,
            status = %checkpoint.status,
            "Recovering unfinished thumbnail workflow run"
        );
        queue_tx
            .send(checkpoint.run_id)
            .map_err(|_| WorkflowError::Internal("workflow runner is shut down".to_string()))?;
    }

    Ok(count)
}
