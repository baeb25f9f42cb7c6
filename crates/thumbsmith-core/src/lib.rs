//! Thumbsmith Core Library
//!
//! This crate provides the domain models, error taxonomy and configuration shared
//! by every Thumbsmith component: the adapters (database, storage, generation
//! service), the workflow orchestrator and the HTTP trigger.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, GenerationConfig, StorageConfig, WorkflowConfig};
pub use error::{ErrorKind, ErrorMetadata, LogLevel, WorkflowError};
pub use storage_types::StorageBackend;
