//! The OData request pipeline
//!
//! [`ODataService::handle`] runs one request end to end: parse the URI, pick
//! a processor, turn failures into exception results and render the outcome.
//! It is synchronous; the HTTP adapter calls it from a blocking thread.

use crate::api::headers;
use crate::datasource::{DataSourceProvider, DataSourceProviderRegistry};
use crate::error::{Error, Result};
use crate::processor::batch::BatchLimits;
use crate::processor::write::select_handler;
use crate::processor::{
    unmarshal, BatchProcessor, FunctionProcessor, Operation, OperationRegistry, ProcessorResult,
    QueryProcessor, QueryResult, WriteProcessor,
};
use crate::render::{json::error_document, ContentLengthPolicy, ODataResponse, RendererSet};
use crate::request::{ODataRequest, ODataRequestContext};
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use oxidata_edm::{parse_uri, Edm, ODataUri, UriKind};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceOptions {
    pub batch_limits: BatchLimits,
    /// Write the request's `Content-Length` on every batch response part.
    pub reuse_request_content_length: bool,
}

pub struct ODataServiceBuilder {
    edm: Arc<Edm>,
    providers: DataSourceProviderRegistry,
    operations: OperationRegistry,
    renderers: Option<RendererSet>,
    options: ServiceOptions,
}

impl ODataServiceBuilder {
    pub fn provider(mut self, provider: Arc<dyn DataSourceProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn operation<F>(mut self, qualified_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Operation> + Send + Sync + 'static,
    {
        self.operations.register(qualified_name, factory);
        self
    }

    pub fn operations(mut self, operations: OperationRegistry) -> Self {
        self.operations = operations;
        self
    }

    pub fn renderers(mut self, renderers: RendererSet) -> Self {
        self.renderers = Some(renderers);
        self
    }

    pub fn options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> ODataService {
        ODataService {
            edm: self.edm,
            providers: self.providers,
            operations: self.operations,
            renderers: self.renderers.unwrap_or_else(RendererSet::standard),
            options: self.options,
        }
    }
}

pub struct ODataService {
    edm: Arc<Edm>,
    providers: DataSourceProviderRegistry,
    operations: OperationRegistry,
    renderers: RendererSet,
    options: ServiceOptions,
}

impl ODataService {
    pub fn builder(edm: Arc<Edm>) -> ODataServiceBuilder {
        ODataServiceBuilder {
            edm,
            providers: DataSourceProviderRegistry::new(),
            operations: OperationRegistry::new(),
            renderers: None,
            options: ServiceOptions::default(),
        }
    }

    pub fn edm(&self) -> &Arc<Edm> {
        &self.edm
    }

    /// Handles one request addressed at `path` below `service_root`.
    pub fn handle(
        &self,
        method: Method,
        service_root: &str,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
    ) -> ODataResponse {
        let content_length = if self.options.reuse_request_content_length {
            ContentLengthPolicy::FromRequest(headers::content_length(&headers))
        } else {
            ContentLengthPolicy::PerPart
        };

        let (uri, uri_error) = match parse_uri(&self.edm, service_root, path, query) {
            Ok(uri) => (uri, None),
            Err(e) => {
                // Keep $format so the error is rendered as asked
                let options = parse_uri(&self.edm, service_root, "", query)
                    .map(|u| u.options)
                    .unwrap_or_default();
                let uri = ODataUri {
                    service_root: service_root.trim_end_matches('/').to_string(),
                    kind: UriKind::ServiceRoot,
                    options,
                };
                (uri, Some(Error::from(e)))
            }
        };

        let request = ODataRequest::new(method, uri).with_headers(headers).with_body(body);
        let ctx = Arc::new(ODataRequestContext::new(request, self.edm.clone()));

        let result = match uri_error {
            Some(error) => {
                tracing::debug!(path, error = %error, "Request URI rejected");
                ProcessorResult::exception(error, Some(ctx.clone()))
            }
            None => self.process(&ctx),
        };
        self.render(&ctx, &result, content_length)
    }

    /// Routes the request to its processor; errors become exception results.
    pub fn process(&self, ctx: &Arc<ODataRequestContext>) -> ProcessorResult {
        let uri = ctx.uri();
        let outcome = if matches!(uri.kind, UriKind::Batch) {
            BatchProcessor::new(&self.providers, &self.operations, self.options.batch_limits)
                .process(ctx)
        } else if uri.operation().is_some() {
            FunctionProcessor::new(&self.providers, &self.operations).process(ctx)
        } else if *ctx.method() == Method::GET {
            QueryProcessor::new(&self.providers).query(ctx)
        } else {
            self.write(ctx)
        };

        outcome.unwrap_or_else(|error| {
            if error.status_code().is_server_error() {
                tracing::error!(code = error.code(), error = %error, "Request failed");
            } else {
                tracing::debug!(code = error.code(), error = %error, "Request rejected");
            }
            ProcessorResult::exception(error, Some(ctx.clone()))
        })
    }

    fn write(&self, ctx: &Arc<ODataRequestContext>) -> Result<ProcessorResult> {
        if select_handler(ctx.method(), ctx.uri()).is_none() {
            tracing::debug!(method = %ctx.method(), "No write handler for request");
            return Ok(ProcessorResult::from_parts(
                StatusCode::METHOD_NOT_ALLOWED,
                QueryResult::Nothing,
                HeaderMap::new(),
                Some(ctx.clone()),
            ));
        }
        let entity = unmarshal::read_entity(ctx)?;
        WriteProcessor::new(&self.providers).write(ctx, entity.as_ref())
    }

    fn render(
        &self,
        ctx: &Arc<ODataRequestContext>,
        result: &ProcessorResult,
        content_length: ContentLengthPolicy,
    ) -> ODataResponse {
        let error = match self.renderers.render(ctx, result, content_length) {
            Ok(response) => return response,
            Err(error) => error,
        };
        tracing::warn!(code = error.code(), error = %error, "Rendering failed");

        let fallback = ProcessorResult::exception(error, Some(ctx.clone()));
        match self.renderers.render(ctx, &fallback, content_length) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Error rendering failed");
                let mut response = ODataResponse::new(fallback.status());
                if let Some(error) = fallback.query_result().as_exception() {
                    response.set_body(error_document(error).to_string());
                }
                response
                    .headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::InMemoryProvider;
    use crate::test_support;

    fn service() -> ODataService {
        let store = test_support::seeded_store();
        ODataService::builder(store.edm().clone())
            .provider(Arc::new(InMemoryProvider::new(store)))
            .build()
    }

    fn get(service: &ODataService, path: &str, query: Option<&str>) -> ODataResponse {
        service.handle(
            Method::GET,
            "http://host/odata",
            path,
            query,
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    #[test]
    fn test_bad_uri_is_rendered_as_error() {
        let response = get(&service(), "Nowhere", None);
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.body_text().contains("ODATA_URI_PARSE"));
    }

    #[test]
    fn test_bad_uri_error_honours_format() {
        let response = get(&service(), "Nowhere", Some("$format=xml"));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.content_type(), Some("application/xml"));
    }

    #[test]
    fn test_unsupported_verb_has_no_body() {
        let response = service().handle(
            Method::POST,
            "http://host/odata",
            "$metadata",
            None,
            HeaderMap::new(),
            Bytes::new(),
        );
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_missing_entity_is_not_found() {
        let response = get(&service(), "Customers(42)", None);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
