//! Replicate predictions API client
//!
//! Docs: https://replicate.com/docs/reference/http#predictions.create

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;
use thumbsmith_core::models::{GenerationJob, GenerationParams, JobStatus, OutputPayload};
use thumbsmith_core::{constants, GenerationConfig};

use crate::service::{GenerationClientError, GenerationService};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Replicate client configuration
#[derive(Clone)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub model_version: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ReplicateConfig {
    pub fn new(api_token: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            model_version: model_version.into(),
            base_url: constants::REPLICATE_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl From<&GenerationConfig> for ReplicateConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            api_token: config.api_token.clone(),
            model_version: config.model_version.clone(),
            base_url: config.api_base.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

impl Debug for ReplicateConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReplicateConfig")
            .field("model_version", &self.model_version)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

pub struct ReplicateClient {
    http_client: reqwest::Client,
    config: ReplicateConfig,
}

impl Debug for ReplicateClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReplicateClient")
            .field("config", &self.config)
            .finish()
    }
}

// Replicate API structures
#[derive(Debug, Serialize)]
struct CreatePredictionRequest<'a> {
    version: &'a str,
    input: &'a GenerationParams,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl TryFrom<PredictionResponse> for GenerationJob {
    type Error = GenerationClientError;

    fn try_from(prediction: PredictionResponse) -> Result<Self, Self::Error> {
        let status = prediction
            .status
            .parse::<JobStatus>()
            .map_err(|_| GenerationClientError::UnrecognizedStatus(prediction.status.clone()))?;

        let error = prediction.error.and_then(|value| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        Ok(GenerationJob {
            id: prediction.id,
            status,
            output: prediction.output.map(OutputPayload::from),
            error,
        })
    }
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Result<Self, GenerationClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                GenerationClientError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn decode(response: reqwest::Response) -> Result<GenerationJob, GenerationClientError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationClientError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let prediction: PredictionResponse = response
            .json()
            .await
            .map_err(|e| GenerationClientError::Decode(e.to_string()))?;

        GenerationJob::try_from(prediction)
    }
}

#[async_trait]
impl GenerationService for ReplicateClient {
    async fn create_job(
        &self,
        params: &GenerationParams,
    ) -> Result<GenerationJob, GenerationClientError> {
        let response = self
            .http_client
            .post(self.endpoint("predictions"))
            .bearer_auth(&self.config.api_token)
            .json(&CreatePredictionRequest {
                version: &self.config.model_version,
                input: params,
            })
            .send()
            .await
            .map_err(|e| GenerationClientError::Transport(e.to_string()))?;

        let job = Self::decode(response).await?;

        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            width = params.width,
            height = params.height,
            "Replicate prediction created"
        );

        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<GenerationJob, GenerationClientError> {
        let response = self
            .http_client
            .get(self.endpoint(&format!("predictions/{}", job_id)))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| GenerationClientError::Transport(e.to_string()))?;

        let job = Self::decode(response).await?;

        tracing::debug!(job_id = %job.id, status = %job.status, "Replicate prediction polled");

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_token() {
        let config = ReplicateConfig::new("r8_secret_token", "sdxl:1234");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("r8_secret_token"));
        assert!(rendered.contains("sdxl:1234"));
    }

    #[test]
    fn endpoint_joins_base_without_double_slash() {
        let client = ReplicateClient::new(
            ReplicateConfig::new("t", "v").with_base_url("http://localhost:1234/v1/"),
        )
        .unwrap();
        assert_eq!(
            client.endpoint("predictions"),
            "http://localhost:1234/v1/predictions"
        );
    }

    #[test]
    fn structured_error_is_stringified() {
        let job = GenerationJob::try_from(PredictionResponse {
            id: "p1".to_string(),
            status: "failed".to_string(),
            output: None,
            error: Some(serde_json::json!({"detail": "oom"})),
        })
        .unwrap();
        assert_eq!(job.error.as_deref(), Some(r#"{"detail":"oom"}"#));
    }
}
