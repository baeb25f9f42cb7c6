use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub database: String,
}

/// Liveness plus a round trip to the run store.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut response = HealthCheckResponse {
        status: "healthy".to_string(),
        database: "unknown".to_string(),
    };

    let query = state.runner.workflow().unfinished(Utc::now(), 1);
    let status_code = match tokio::time::timeout(TIMEOUT, query).await {
        Ok(Ok(_)) => {
            response.database = "healthy".to_string();
            StatusCode::OK
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Database health check failed");
            response.database = "unhealthy".to_string();
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(_) => {
            tracing::error!("Database health check timed out");
            response.database = "timeout".to_string();
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    if status_code != StatusCode::OK {
        response.status = "unhealthy".to_string();
    }

    (status_code, Json(response))
}
