//! Shared key generation for storage backends.
//!
//! Key format: `thumbnails/{uuid}.{ext}`.

use crate::traits::{StorageError, StorageResult};
use thumbsmith_core::constants::ARTIFACT_KEY_PREFIX;
use uuid::Uuid;

/// Generate a fresh artifact key with the given file extension.
pub fn generate_artifact_key(extension: &str) -> String {
    format!("{}/{}.{}", ARTIFACT_KEY_PREFIX, Uuid::new_v4(), extension)
}

/// Reject keys that could escape the storage root.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.contains("..") || storage_key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
