//! Thumbsmith DB Library
//!
//! Persistence for the thumbnail workflow: the record store over `videos`, the
//! durable run checkpoints and the per-record lease.

pub mod db;

pub use db::*;
