//! Informational endpoints outside the OData service

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "odata-server"
    }))
}

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "server": "OData Server (Rust)",
            "version": env!("CARGO_PKG_VERSION"),
            "odataVersion": "4.0",
            "serviceRoot": state.config.service.path,
            "status": "running"
        })),
    )
}
