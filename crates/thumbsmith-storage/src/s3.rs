//! S3 (and S3-compatible) backend over `object_store`.

use crate::keys::validate_key;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};
use std::time::Instant;

#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    /// Object URLs are `{url_prefix}/{key}`.
    url_prefix: String,
}

/// Where clients fetch objects from: a public base URL (CDN) if configured,
/// path-style on a custom endpoint, virtual-hosted AWS otherwise.
fn url_prefix(
    bucket: &str,
    region: &str,
    endpoint: Option<&str>,
    public_base_url: Option<&str>,
) -> String {
    match (public_base_url, endpoint) {
        (Some(base), _) => base.trim_end_matches('/').to_string(),
        (None, Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
        (None, None) => format!("https://{}.s3.{}.amazonaws.com", bucket, region),
    }
}

impl S3Storage {
    /// Build the client. Credentials come from the standard AWS environment
    /// variables; `endpoint` targets MinIO and other S3-compatible services.
    pub fn new(
        bucket: String,
        region: String,
        endpoint: Option<String>,
        public_base_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.as_str())
            .with_bucket_name(bucket.as_str());

        if let Some(endpoint) = endpoint.as_deref() {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let url_prefix = url_prefix(
            &bucket,
            &region,
            endpoint.as_deref(),
            public_base_url.as_deref(),
        );

        Ok(S3Storage {
            store,
            bucket,
            url_prefix,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }

    fn location(key: &str) -> StorageResult<Path> {
        validate_key(key)?;
        Ok(Path::from(key))
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<String> {
        let location = Self::location(storage_key)?;
        let size = data.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        let started = Instant::now();
        if let Err(e) = self
            .store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
        {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %storage_key,
                size_bytes = size,
                "S3 put failed"
            );
            return Err(StorageError::UploadFailed(e.to_string()));
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = size,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Stored object in S3"
        );

        Ok(self.object_url(storage_key))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let location = Self::location(storage_key)?;

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {
                tracing::info!(bucket = %self.bucket, key = %storage_key, "Removed object from S3");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    "S3 delete failed"
                );
                Err(StorageError::DeleteFailed(e.to_string()))
            }
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
