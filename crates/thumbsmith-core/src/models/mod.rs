//! Data models for the thumbnail workflow
//!
//! Grouped by the collaborator that owns them: the generation service, the
//! record store, and the workflow's own durable run state.

mod generation;
mod record;
mod workflow;

pub use generation::*;
pub use record::*;
pub use workflow::*;
