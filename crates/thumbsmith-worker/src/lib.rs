//! Thumbsmith Worker
//!
//! Drives thumbnail workflow runs. [`ThumbnailWorkflow`] executes one run as a
//! sequence of checkpointed steps; [`WorkflowRunner`] executes many of them in the
//! background with bounded concurrency.

pub mod runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod workflow;

pub use runner::WorkflowRunner;
pub use workflow::ThumbnailWorkflow;
