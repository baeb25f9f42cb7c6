use crate::fetch::SourceFetcher;
use crate::keys::{generate_artifact_key, validate_key};
use crate::traits::{ArtifactStore, Storage, StorageResult};
use async_trait::async_trait;
use std::sync::Arc;
use thumbsmith_core::models::UploadedArtifact;

/// [`ArtifactStore`] over any [`Storage`] backend.
#[derive(Clone)]
pub struct ArtifactIngestor {
    storage: Arc<dyn Storage>,
    fetcher: SourceFetcher,
}

impl ArtifactIngestor {
    pub fn new(storage: Arc<dyn Storage>, fetcher: SourceFetcher) -> Self {
        Self { storage, fetcher }
    }
}

#[async_trait]
impl ArtifactStore for ArtifactIngestor {
    #[tracing::instrument(skip(self), fields(backend = %self.storage.backend_type()))]
    async fn ingest_from_url(&self, source_url: &str) -> StorageResult<Vec<UploadedArtifact>> {
        let source = self.fetcher.fetch(source_url).await?;
        let key = generate_artifact_key(&source.extension);
        let size = source.data.len();

        let url = self
            .storage
            .upload_with_key(&key, source.data, &source.content_type)
            .await?;

        tracing::info!(
            storage_key = %key,
            size_bytes = size,
            content_type = %source.content_type,
            "Artifact ingested"
        );

        Ok(vec![UploadedArtifact { key, url }])
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.storage.delete(key).await
    }
}
