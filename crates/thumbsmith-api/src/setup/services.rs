//! Service initialization

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use thumbsmith_core::Config;
use thumbsmith_db::{CheckpointRepository, LeaseRepository, VideoRepository};
use thumbsmith_generation::{ReplicateClient, ReplicateConfig};
use thumbsmith_storage::create_artifact_store;
use thumbsmith_worker::{ThumbnailWorkflow, WorkflowRunner};

use crate::state::AppState;

/// Wire repositories, storage and the generation client into the workflow runner.
pub async fn initialize_services(config: &Config, pool: PgPool) -> Result<Arc<AppState>> {
    let artifacts = create_artifact_store(&config.storage)
        .await
        .context("Failed to initialize artifact storage")?;

    let generation = ReplicateClient::new(ReplicateConfig::from(&config.generation))
        .context("Failed to initialize Replicate client")?;

    let workflow = ThumbnailWorkflow::new(
        Arc::new(VideoRepository::new(pool.clone())),
        Arc::new(generation),
        artifacts,
        Arc::new(CheckpointRepository::new(pool.clone())),
        Arc::new(LeaseRepository::new(pool)),
        config.workflow.clone(),
    )
    .with_output_size(config.generation.width, config.generation.height);

    let runner = Arc::new(WorkflowRunner::new(Arc::new(workflow)));

    if config.workflow.recover_on_start {
        let recovered = runner
            .recover_unfinished()
            .await
            .context("Failed to recover unfinished workflow runs")?;
        tracing::info!(recovered = recovered, "Unfinished workflow runs queued");
    }

    Ok(Arc::new(AppState::new(runner)))
}
