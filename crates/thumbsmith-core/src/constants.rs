//! Fixed parameters of the thumbnail workflow.
//!
//! These are the defaults; every value can be overridden through [`crate::Config`].

/// Output geometry requested from the generation service.
pub const THUMBNAIL_WIDTH: u32 = 1792;
pub const THUMBNAIL_HEIGHT: u32 = 1024;

/// A generation job must produce exactly one image.
pub const NUM_OUTPUTS: u32 = 1;

/// Delay between two status polls.
pub const POLL_INTERVAL_MS: u64 = 1_500;

/// Wall-clock budget for polling, measured from job creation.
pub const POLL_TIMEOUT_MS: u64 = 60_000;

/// Default Replicate API base URL.
pub const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";

/// Prefix under which generated artifacts are stored.
pub const ARTIFACT_KEY_PREFIX: &str = "thumbnails";

/// Reason reported when a job fails without an upstream error message.
pub const DEFAULT_GENERATION_FAILURE: &str = "Image generation failed";
