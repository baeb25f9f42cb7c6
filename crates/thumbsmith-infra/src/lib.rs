//! Thumbsmith Infrastructure Library
//!
//! Shared plumbing for the Thumbsmith binaries:
//! - Middleware (request ID)
//! - Telemetry initialization

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, LogFormat};
