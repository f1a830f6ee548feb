//! API layer - routes, handlers, and middleware

pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod url;

use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, routing::any, routing::get, Router};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_request_body_size;
    let cors_origins = state.config.server.cors_allowed_origins.clone();
    let service_path = state.config.service.path.trim_end_matches('/').to_string();

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::root))
        // Every OData resource, including $metadata and $batch, shares one handler
        .route(&service_path, any(handlers::odata_request))
        .route(&format!("{service_path}/"), any(handlers::odata_request))
        .route(&format!("{service_path}/*rest"), any(handlers::odata_request))
        .with_state(state)
        // Add middleware (applied in reverse order)
        .layer(middleware::compression())
        .layer(middleware::cors(&cors_origins))
        .layer(middleware::trace())
        .layer(DefaultBodyLimit::max(max_body_size))
}
