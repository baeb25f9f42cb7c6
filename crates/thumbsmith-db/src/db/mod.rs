//! Database repositories for data access layer
//!
//! Each repository implements one of the capability traits in `traits`, which is
//! what the workflow depends on.

pub mod checkpoint;
pub mod lease;
pub mod record;
pub mod traits;

pub use checkpoint::CheckpointRepository;
pub use lease::LeaseRepository;
pub use record::VideoRepository;
pub use traits::{CheckpointStore, LeaseClaim, RecordLease, RecordStore};
