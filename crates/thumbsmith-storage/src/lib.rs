//! Thumbsmith Storage Library
//!
//! Object storage for generated thumbnails. The crate has two layers:
//!
//! - [`Storage`]: a raw key/value backend (S3 or local filesystem).
//! - [`ArtifactStore`]: what the workflow sees. It ingests a remote image (an
//!   HTTP(S) URL or a `data:image/...` URI) into a backend and deletes artifacts
//!   by key.
//!
//! # Storage key format
//!
//! Artifacts are keyed `thumbnails/{uuid}.{ext}`. Keys must not contain `..` or a
//! leading `/`; key generation and validation live in the `keys` module so all
//! backends stay consistent.

pub mod factory;
pub mod fetch;
pub mod ingest;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::{create_artifact_store, create_storage};
pub use fetch::{FetchedSource, SourceFetcher};
pub use ingest::ArtifactIngestor;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use thumbsmith_core::StorageBackend;
pub use traits::{ArtifactStore, Storage, StorageError, StorageResult};
