//! Storage abstraction traits
//!
//! `Storage` is implemented by each backend. `ArtifactStore` is the capability the
//! thumbnail workflow depends on.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use thumbsmith_core::models::UploadedArtifact;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The source URL cannot be ingested (bad scheme, not an image, malformed data URI).
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Source too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Raw object storage backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` under `storage_key` and return the public URL of the object.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Delete an object. Deleting a key that does not exist succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

/// Fetch-and-store plus delete-by-key, as used by the thumbnail workflow.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `source_url` and store it. Returns one descriptor per stored file.
    async fn ingest_from_url(&self, source_url: &str) -> StorageResult<Vec<UploadedArtifact>>;

    /// Delete an artifact by key. A missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
