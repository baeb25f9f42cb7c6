//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`; workflow errors and
//! request validation failures both render as [`ErrorResponse`] with a status,
//! code and retry hint taken from [`ErrorMetadata`].

use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use thumbsmith_core::{ErrorMetadata, LogLevel, WorkflowError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl AppError {
    fn error_type(&self) -> String {
        match self {
            AppError::InvalidInput(_) => "invalid_input".to_string(),
            AppError::Workflow(err) => err.kind().to_string(),
        }
    }

    /// Internal errors carry store details that clients never see.
    fn is_sensitive(&self) -> bool {
        matches!(self, AppError::Workflow(WorkflowError::Internal(_)))
    }

    fn detailed_message(&self) -> String {
        match self {
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::Workflow(err) => err.message().to_string(),
        }
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::Workflow(err) => err.http_status_code(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::Workflow(err) => err.error_code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            AppError::InvalidInput(_) => false,
            AppError::Workflow(err) => err.is_recoverable(),
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::Workflow(err) => err.client_message(),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            AppError::InvalidInput(_) => LogLevel::Debug,
            AppError::Workflow(err) => err.log_level(),
        }
    }
}

/// Wrapper so handlers can return domain errors directly.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<WorkflowError> for HttpAppError {
    fn from(err: WorkflowError) -> Self {
        HttpAppError(AppError::Workflow(err))
    }
}

impl From<validator::ValidationErrors> for HttpAppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        HttpAppError(AppError::InvalidInput(messages.join("; ")))
    }
}

/// Convert JSON body deserialization failures into a 400 with our ErrorResponse format.
impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        HttpAppError(AppError::InvalidInput(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

/// JSON body extractor that returns our ErrorResponse format (400 + JSON) on deserialization failure.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = %error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = %error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = %error_type, "Error occurred");
        }
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        let body = if app_error.is_sensitive() {
            ErrorResponse {
                error: app_error.client_message(),
                details: None,
                error_type: None,
                code: app_error.error_code().to_string(),
                recoverable: app_error.is_recoverable(),
            }
        } else {
            ErrorResponse {
                error: app_error.client_message(),
                details: Some(app_error.detailed_message()),
                error_type: Some(app_error.error_type()),
                code: app_error.error_code().to_string(),
                recoverable: app_error.is_recoverable(),
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbsmith_core::models::GenerationRequest;
    use validator::Validate;

    #[test]
    fn workflow_errors_keep_their_status() {
        let HttpAppError(err) = WorkflowError::NotFound("video v1".to_string()).into();
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "NOT_FOUND");

        let HttpAppError(err) = WorkflowError::Timeout("60000ms".to_string()).into();
        assert_eq!(err.http_status_code(), 504);
        assert!(err.is_recoverable());
    }

    #[test]
    fn validation_errors_become_invalid_input() {
        let request = GenerationRequest::new("u1", "", "");
        let HttpAppError(err) = request.validate().unwrap_err().into();
        match err {
            AppError::InvalidInput(msg) => {
                assert_eq!(msg, "prompt must not be empty; recordId must not be empty");
            }
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn internal_errors_hide_their_kind() {
        let err = AppError::Workflow(WorkflowError::Internal("pool timed out".to_string()));
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("pool"));
        assert!(!AppError::InvalidInput("x".to_string()).is_sensitive());
    }
}
