//! Thumbsmith API
//!
//! HTTP entry points for triggering thumbnail workflow runs and reading their
//! state. The binary in `main.rs` wires the production collaborators; tests build
//! the router over in-memory ones.

pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;

pub use error::{AppError, ErrorResponse, HttpAppError, ValidatedJson};
pub use state::AppState;
