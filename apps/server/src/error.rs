//! Error types for the OData service
//!
//! Every variant maps to one HTTP status and one OData error code. Errors
//! raised while processing become an EXCEPTION result and are rendered by the
//! negotiated error renderer; [`IntoResponse`] covers failures outside the
//! pipeline (body extraction, worker panics).

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use oxidata_edm::{EdmError, UriError};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{message}")]
    BadRequest {
        message: String,
        target: Option<String>,
    },

    #[error("Target type could not be determined: {0}")]
    TargetType(String),

    #[error("An entity with key {key} already exists in {entity_set}")]
    DuplicateKey { entity_set: String, key: String },

    #[error("Entity {target} is already linked through {property}")]
    EntityAlreadyLinked { property: String, target: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Cannot read request body: {0}")]
    Unmarshaller(String),

    #[error("Invalid URI: {0}")]
    UriParse(#[from] UriError),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Query processing error: {0}")]
    QueryProcessing(String),

    #[error("{message}")]
    Processor {
        message: String,
        target: Option<String>,
    },

    #[error("Rendering failed: {0}")]
    Renderer(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Model error: {0}")]
    Edm(#[from] EdmError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            target: None,
        }
    }

    pub fn bad_request_at(message: impl Into<String>, target: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            target: Some(target.into()),
        }
    }

    pub fn processor(message: impl Into<String>) -> Self {
        Error::Processor {
            message: message.into(),
            target: None,
        }
    }

    pub fn processor_at(message: impl Into<String>, target: impl Into<String>) -> Self {
        Error::Processor {
            message: message.into(),
            target: Some(target.into()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. }
            | Error::TargetType(_)
            | Error::DuplicateKey { .. }
            | Error::EntityAlreadyLinked { .. }
            | Error::Unmarshaller(_)
            | Error::UriParse(_) => StatusCode::BAD_REQUEST,
            Error::EntityNotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::DataSource(_)
            | Error::QueryProcessing(_)
            | Error::Processor { .. }
            | Error::Renderer(_)
            | Error::Edm(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::BadRequest { .. } => "ODATA_BAD_REQUEST",
            Error::TargetType(_) => "ODATA_TARGET_TYPE",
            Error::DuplicateKey { .. } => "ODATA_DUPLICATE_KEY",
            Error::EntityAlreadyLinked { .. } => "ODATA_ENTITY_ALREADY_LINKED",
            Error::EntityNotFound(_) => "ODATA_ENTITY_NOT_FOUND",
            Error::MethodNotAllowed(_) => "ODATA_METHOD_NOT_ALLOWED",
            Error::NotAcceptable(_) => "ODATA_NOT_ACCEPTABLE",
            Error::Unmarshaller(_) => "ODATA_UNMARSHALLER",
            Error::UriParse(_) => "ODATA_URI_PARSE",
            Error::DataSource(_) => "ODATA_DATA_SOURCE",
            Error::QueryProcessing(_) => "ODATA_QUERY_PROCESSING",
            Error::Processor { .. } => "ODATA_PROCESSOR",
            Error::Renderer(_) => "ODATA_RENDERER",
            Error::NotImplemented(_) => "ODATA_NOT_IMPLEMENTED",
            Error::Edm(_) => "ODATA_EDM",
            Error::Internal(_) => "ODATA_INTERNAL",
        }
    }

    /// Offending property or URI segment, when known.
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::BadRequest { target, .. } | Error::Processor { target, .. } => target.as_deref(),
            Error::EntityAlreadyLinked { property, .. } => Some(property),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Internal error: {}", self);
        }

        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(target) = self.target() {
            error["target"] = json!(target);
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}
