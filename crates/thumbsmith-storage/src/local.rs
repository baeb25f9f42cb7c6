//! Filesystem backend for development and single-node deployments.
//!
//! Objects live under `base_path/<key>` and are served by whatever fronts
//! `base_url`. Writes go to a sibling temp file first and are renamed into
//! place, so a reader never sees a partial thumbnail.

use crate::keys::validate_key;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    /// Open (and create if needed) the storage root.
    pub async fn new(root: impl Into<PathBuf>, public_base_url: String) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "cannot create storage root {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let path = self.root.join(key);
        if !path.starts_with(&self.root) {
            return Err(StorageError::InvalidKey(format!(
                "{} resolves outside the storage root",
                key
            )));
        }
        Ok(path)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    async fn write_atomically(&self, path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let staging = path.with_extension(format!("{}.part", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        let written = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }
        fs::rename(&staging, path).await
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> StorageResult<String> {
        let path = self.object_path(storage_key)?;
        let started = Instant::now();

        self.write_atomically(&path, &data).await.map_err(|e| {
            StorageError::UploadFailed(format!("write {}: {}", path.display(), e))
        })?;

        tracing::info!(
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Stored object on local disk"
        );

        Ok(self.public_url(storage_key))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.object_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(key = %storage_key, "Removed object from local disk");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upload_then_delete() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:4000/media/".to_string())
            .await
            .unwrap();

        let url = storage
            .upload_with_key("thumbnails/a.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:4000/media/thumbnails/a.png");
        let path = dir.path().join("thumbnails/a.png");
        assert_eq!(std::fs::read(&path).unwrap(), b"png");

        storage.delete("thumbnails/a.png").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn upload_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost".to_string())
            .await
            .unwrap();
        storage
            .upload_with_key("thumbnails/b.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();

        let mut entries = std::fs::read_dir(dir.path().join("thumbnails"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        entries.sort();
        assert_eq!(entries, ["b.png"]);
    }

    #[tokio::test]
    async fn delete_missing_key_succeeds() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost".to_string())
            .await
            .unwrap();
        assert!(storage.delete("thumbnails/never-written.png").await.is_ok());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost".to_string())
            .await
            .unwrap();
        let err = storage
            .upload_with_key("../escape.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
