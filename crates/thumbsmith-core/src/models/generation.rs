use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use validator::Validate;

use crate::constants;

/// Input of one workflow run. Identifies exactly one record, scoped to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(alias = "userId")]
    #[validate(length(min = 1, message = "ownerId must not be empty"))]
    pub owner_id: String,
    #[serde(alias = "videoId")]
    #[validate(length(min = 1, message = "recordId must not be empty"))]
    pub record_id: String,
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(
        owner_id: impl Into<String>,
        record_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            record_id: record_id.into(),
            prompt: prompt.into(),
        }
    }
}

/// Parameters of a "create job" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
}

impl GenerationParams {
    pub fn thumbnail(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: constants::THUMBNAIL_WIDTH,
            height: constants::THUMBNAIL_HEIGHT,
            num_outputs: constants::NUM_OUTPUTS,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Status vocabulary of the generation service.
///
/// `Starting`, `Queued` and `Processing` are treated identically by the poll loop.
/// Any other string fails to parse; an unknown status is never polled forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Queued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(JobStatus::Starting),
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Loosely-typed job output, decoded once at the client boundary.
///
/// JSON null, numbers and booleans all become `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPayload {
    Text(String),
    Sequence(Vec<OutputPayload>),
    Keyed(BTreeMap<String, OutputPayload>),
    Other,
}

impl From<JsonValue> for OutputPayload {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) => OutputPayload::Text(s),
            JsonValue::Array(items) => {
                OutputPayload::Sequence(items.into_iter().map(OutputPayload::from).collect())
            }
            JsonValue::Object(map) => OutputPayload::Keyed(
                map.into_iter()
                    .map(|(k, v)| (k, OutputPayload::from(v)))
                    .collect(),
            ),
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => OutputPayload::Other,
        }
    }
}

impl Serialize for OutputPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OutputPayload::Text(s) => serializer.serialize_str(s),
            OutputPayload::Sequence(items) => items.serialize(serializer),
            OutputPayload::Keyed(map) => map.serialize(serializer),
            OutputPayload::Other => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for OutputPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(OutputPayload::from)
    }
}

/// Read-only snapshot of an upstream generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationJob {
    /// Failure reason for a terminal non-success job.
    pub fn failure_reason(&self) -> String {
        self.error
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(constants::DEFAULT_GENERATION_FAILURE)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_accepts_original_field_names() {
        let request: GenerationRequest = serde_json::from_value(json!({
            "userId": "u1",
            "videoId": "v1",
            "prompt": "a red fox"
        }))
        .unwrap();
        assert_eq!(request, GenerationRequest::new("u1", "v1", "a red fox"));
    }

    #[test]
    fn request_rejects_empty_prompt() {
        let request = GenerationRequest::new("u1", "v1", "");
        assert!(request.validate().is_err());
        assert!(GenerationRequest::new("u1", "v1", "fox").validate().is_ok());
    }

    #[test]
    fn status_vocabulary() {
        for (raw, terminal) in [
            ("starting", false),
            ("queued", false),
            ("processing", false),
            ("succeeded", true),
            ("failed", true),
            ("canceled", true),
        ] {
            let status: JobStatus = raw.parse().unwrap();
            assert_eq!(status.is_terminal(), terminal, "{raw}");
            assert_eq!(status.to_string(), raw);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn payload_decodes_scalars_as_other() {
        assert_eq!(OutputPayload::from(json!(null)), OutputPayload::Other);
        assert_eq!(OutputPayload::from(json!(42)), OutputPayload::Other);
        assert_eq!(OutputPayload::from(json!(true)), OutputPayload::Other);
    }

    #[test]
    fn payload_survives_checkpoint_serialization() {
        let payload = OutputPayload::from(json!([{"url": "https://img/y.png"}]));
        let stored = serde_json::to_value(&payload).unwrap();
        assert_eq!(stored, json!([{"url": "https://img/y.png"}]));
        let restored: OutputPayload = serde_json::from_value(stored).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn failure_reason_falls_back_to_generic_message() {
        let mut job = GenerationJob {
            id: "p1".to_string(),
            status: JobStatus::Failed,
            output: None,
            error: None,
        };
        assert_eq!(job.failure_reason(), "Image generation failed");
        job.error = Some("NSFW content detected".to_string());
        assert_eq!(job.failure_reason(), "NSFW content detected");
    }
}
