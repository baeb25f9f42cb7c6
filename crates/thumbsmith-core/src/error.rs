//! Error types module
//!
//! `WorkflowError` is the single failure surface of a thumbnail run. Every step of
//! the workflow maps its collaborator's error into exactly one variant, and the
//! variant decides how the failure is reported (`ErrorMetadata`) and whether a
//! caller may retry the whole run.
//!
//! Failures are persisted with the run checkpoint as `{kind, message}`, so
//! `ErrorKind` is serialisable and `WorkflowError::from_parts` rebuilds the
//! error when a finished run is looked up again.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like a missing record
    Debug,
    /// Warning level - for failures caused by an upstream service
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "GENERATION_TIMEOUT")
    fn error_code(&self) -> &'static str;

    /// Whether the caller may re-invoke the whole run
    fn is_recoverable(&self) -> bool;

    /// Client-facing message
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// Target record missing or owned by someone else.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The generation service rejected or never answered our request.
    #[error("Generation service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The job did not reach a terminal status within the poll budget.
    #[error("Generation timed out: {0}")]
    Timeout(String),

    /// The job ran and ended in `failed` or `canceled`.
    #[error("Generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// The job succeeded but its output holds no usable URL.
    #[error("No output: {0}")]
    NoOutput(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The record was deleted or reassigned between load and commit.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The generation service reported a status outside its documented vocabulary.
    #[error("Unrecognized job status: {0}")]
    UnrecognizedStatus(String),

    /// Another live run holds the lease on the same record.
    #[error("Record busy: {0}")]
    RecordBusy(String),

    /// Record store or checkpoint store failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialisable discriminant of [`WorkflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    UpstreamUnavailable,
    Timeout,
    GenerationFailed,
    NoOutput,
    UploadFailed,
    ConcurrentModification,
    UnrecognizedStatus,
    RecordBusy,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::GenerationFailed => "generation_failed",
            ErrorKind::NoOutput => "no_output",
            ErrorKind::UploadFailed => "upload_failed",
            ErrorKind::ConcurrentModification => "concurrent_modification",
            ErrorKind::UnrecognizedStatus => "unrecognized_status",
            ErrorKind::RecordBusy => "record_busy",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            WorkflowError::Timeout(_) => ErrorKind::Timeout,
            WorkflowError::GenerationFailed { .. } => ErrorKind::GenerationFailed,
            WorkflowError::NoOutput(_) => ErrorKind::NoOutput,
            WorkflowError::UploadFailed(_) => ErrorKind::UploadFailed,
            WorkflowError::ConcurrentModification(_) => ErrorKind::ConcurrentModification,
            WorkflowError::UnrecognizedStatus(_) => ErrorKind::UnrecognizedStatus,
            WorkflowError::RecordBusy(_) => ErrorKind::RecordBusy,
            WorkflowError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The diagnostic message attached to the failure, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            WorkflowError::NotFound(m)
            | WorkflowError::UpstreamUnavailable(m)
            | WorkflowError::Timeout(m)
            | WorkflowError::NoOutput(m)
            | WorkflowError::UploadFailed(m)
            | WorkflowError::ConcurrentModification(m)
            | WorkflowError::UnrecognizedStatus(m)
            | WorkflowError::RecordBusy(m)
            | WorkflowError::Internal(m) => m,
            WorkflowError::GenerationFailed { reason } => reason,
        }
    }

    /// Rebuild an error from its persisted `{kind, message}` form.
    pub fn from_parts(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::NotFound => WorkflowError::NotFound(message),
            ErrorKind::UpstreamUnavailable => WorkflowError::UpstreamUnavailable(message),
            ErrorKind::Timeout => WorkflowError::Timeout(message),
            ErrorKind::GenerationFailed => WorkflowError::GenerationFailed { reason: message },
            ErrorKind::NoOutput => WorkflowError::NoOutput(message),
            ErrorKind::UploadFailed => WorkflowError::UploadFailed(message),
            ErrorKind::ConcurrentModification => WorkflowError::ConcurrentModification(message),
            ErrorKind::UnrecognizedStatus => WorkflowError::UnrecognizedStatus(message),
            ErrorKind::RecordBusy => WorkflowError::RecordBusy(message),
            ErrorKind::Internal => WorkflowError::Internal(message),
        }
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        WorkflowError::Internal(format!("{:#}", err))
    }
}

/// Static metadata for each kind: (http_status, error_code, recoverable, log_level).
fn static_metadata(kind: ErrorKind) -> (u16, &'static str, bool, LogLevel) {
    match kind {
        ErrorKind::NotFound => (404, "NOT_FOUND", false, LogLevel::Debug),
        ErrorKind::UpstreamUnavailable => (502, "UPSTREAM_UNAVAILABLE", true, LogLevel::Warn),
        ErrorKind::Timeout => (504, "GENERATION_TIMEOUT", true, LogLevel::Warn),
        ErrorKind::GenerationFailed => (422, "GENERATION_FAILED", false, LogLevel::Warn),
        ErrorKind::NoOutput => (422, "NO_OUTPUT", false, LogLevel::Warn),
        ErrorKind::UploadFailed => (502, "UPLOAD_FAILED", true, LogLevel::Error),
        ErrorKind::ConcurrentModification => {
            (409, "CONCURRENT_MODIFICATION", false, LogLevel::Warn)
        }
        ErrorKind::UnrecognizedStatus => (502, "UNRECOGNIZED_STATUS", false, LogLevel::Error),
        ErrorKind::RecordBusy => (409, "RECORD_BUSY", true, LogLevel::Debug),
        ErrorKind::Internal => (500, "INTERNAL_ERROR", true, LogLevel::Error),
    }
}

impl ErrorMetadata for WorkflowError {
    fn http_status_code(&self) -> u16 {
        static_metadata(self.kind()).0
    }

    fn error_code(&self) -> &'static str {
        static_metadata(self.kind()).1
    }

    fn is_recoverable(&self) -> bool {
        static_metadata(self.kind()).2
    }

    fn client_message(&self) -> String {
        match self {
            WorkflowError::Internal(_) => "Internal error while running workflow".to_string(),
            other => other.to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        static_metadata(self.kind()).3
    }
}
