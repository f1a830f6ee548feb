//! Request and request context types shared by processors and renderers.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use oxidata_edm::{Edm, ODataUri};
use std::sync::Arc;

/// One OData request: parsed URI, verb, headers and raw body.
#[derive(Debug, Clone)]
pub struct ODataRequest {
    pub method: Method,
    pub uri: ODataUri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ODataRequest {
    pub fn new(method: Method, uri: ODataUri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Position of a request inside a `$batch` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub content_id: Option<String>,
    pub changeset: Option<ChangeSetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetInfo {
    pub id: String,
    /// Number of requests in the changeset.
    pub size: usize,
}

/// The request plus the model it is evaluated against.
#[derive(Debug, Clone)]
pub struct ODataRequestContext {
    pub request: ODataRequest,
    pub edm: Arc<Edm>,
    pub batch_item: Option<BatchItem>,
}

impl ODataRequestContext {
    pub fn new(request: ODataRequest, edm: Arc<Edm>) -> Self {
        Self {
            request,
            edm,
            batch_item: None,
        }
    }

    pub fn for_batch_item(request: ODataRequest, edm: Arc<Edm>, item: BatchItem) -> Self {
        Self {
            request,
            edm,
            batch_item: Some(item),
        }
    }

    pub fn uri(&self) -> &ODataUri {
        &self.request.uri
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn service_root(&self) -> &str {
        &self.request.uri.service_root
    }

    pub fn changeset(&self) -> Option<&ChangeSetInfo> {
        self.batch_item.as_ref()?.changeset.as_ref()
    }
}
