//! Thumbsmith Generation Library
//!
//! Client for the external image generation service (Replicate predictions API)
//! and the normalisation of its loosely-typed output into a single media URL.

pub mod extract;
pub mod replicate;
pub mod service;

pub use extract::{extract_output_url, is_usable_url};
pub use replicate::{ReplicateClient, ReplicateConfig};
pub use service::{GenerationClientError, GenerationService};
