//! Shared HTTP middleware for Thumbsmith services

pub mod request_id;

pub use request_id::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};
