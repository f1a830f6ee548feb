//! The single entry point for every request below the service path

use crate::api::url::service_root_from_headers;
use crate::error::Error;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};

/// Runs the OData pipeline for one request.
///
/// The pipeline is synchronous (data sources may block), so it runs on a
/// blocking thread from start to finish.
pub async fn odata_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let service_path = state.config.service.path.clone();
    let service_root = service_root_from_headers(&headers, &service_path);
    let path = uri
        .path()
        .strip_prefix(service_path.as_str())
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();
    let query = uri.query().map(str::to_string);

    tracing::debug!(method = %method, path = %path, "OData request");
    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        service.handle(method, &service_root, &path, query.as_deref(), headers, body)
    })
    .await;

    match outcome {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "OData pipeline task failed");
            Error::Internal("request processing was aborted".to_string()).into_response()
        }
    }
}
