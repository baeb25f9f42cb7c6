use serde::{Deserialize, Serialize};

/// The record a thumbnail is generated for (a video), as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    pub owner_id: String,
    pub current_artifact_key: Option<String>,
    pub current_artifact_url: Option<String>,
}

/// A stored object produced by one successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedArtifact {
    pub key: String,
    pub url: String,
}

/// Result of the conditional artifact swap on a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSwap {
    pub rows_affected: u64,
    /// Artifact key the record held right before the update.
    pub previous_key: Option<String>,
}

impl ArtifactSwap {
    pub fn not_applied() -> Self {
        Self {
            rows_affected: 0,
            previous_key: None,
        }
    }

    pub fn applied(&self) -> bool {
        self.rows_affected > 0
    }
}
