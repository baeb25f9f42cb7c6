//! Route configuration and setup

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use thumbsmith_core::Config;
use thumbsmith_infra::request_id_middleware;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api";

/// Trigger bodies are three short strings.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router, anyhow::Error> {
    let cors = setup_cors(config)?;
    Ok(build_router(state).layer(cors))
}

/// Routes and middleware without CORS, as used by tests.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/videos/workflows/thumbnail",
            post(handlers::thumbnail::trigger_thumbnail),
        )
        .route(
            "/videos/workflows/thumbnail/{run_id}",
            get(handlers::thumbnail::get_thumbnail_run),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest(API_PREFIX, api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        if config.is_production() {
            tracing::warn!("CORS configured to allow all origins - not recommended for production");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    };
    Ok(cors)
}
