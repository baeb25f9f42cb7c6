use async_trait::async_trait;
use thiserror::Error;
use thumbsmith_core::models::{GenerationJob, GenerationParams};

/// Failure of our own request to the generation service.
///
/// A job that ran and ended in `failed` is not an error here; it is returned as a
/// [`GenerationJob`] with a terminal status.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("unrecognized job status '{0}'")]
    UnrecognizedStatus(String),
}

/// The two operations the workflow needs from a generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn create_job(
        &self,
        params: &GenerationParams,
    ) -> Result<GenerationJob, GenerationClientError>;

    async fn get_job(&self, job_id: &str) -> Result<GenerationJob, GenerationClientError>;
}
