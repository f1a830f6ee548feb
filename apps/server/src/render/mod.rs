//! Response rendering
//!
//! Every renderer scores itself against the request and the result; the
//! highest non-zero score renders. Ties go to the renderer declared first in
//! [`RendererSet::standard`]. Results without a payload are written without
//! consulting any renderer.

pub mod atom;
pub mod batch;
pub mod json;
pub mod raw;
pub mod scoring;

use crate::api::headers::{ODATA_VERSION, ODATA_VERSION_VALUE};
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult, ResultItem};
use crate::request::ODataRequestContext;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use oxidata_edm::{PathSegment, TargetKind, UriKind};
use oxidata_format::FormatError;

/// How `Content-Length` is written on `$batch` response parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentLengthPolicy {
    /// Length of each part's own body.
    #[default]
    PerPart,
    /// The outer request's declared length on every part; omitted when absent.
    FromRequest(Option<usize>),
}

/// A rendered response, ready for the HTTP adapter.
#[derive(Debug)]
pub struct ODataResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ODataResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn set_content_type(&mut self, content_type: &str) -> Result<()> {
        let value = HeaderValue::from_str(content_type)
            .map_err(|_| Error::Renderer(format!("invalid content type {content_type}")))?;
        self.headers.insert(header::CONTENT_TYPE, value);
        Ok(())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl IntoResponse for ODataResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// What a renderer sees besides the result.
pub struct RenderContext<'a> {
    pub request: &'a ODataRequestContext,
    /// The full set, for renderers that render nested results.
    pub renderers: &'a RendererSet,
    pub content_length: ContentLengthPolicy,
}

pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// 0 when this renderer cannot render `result` for `ctx`.
    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32;

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()>;
}

pub struct RendererSet {
    renderers: Vec<Box<dyn Renderer>>,
}

impl RendererSet {
    pub fn new(renderers: Vec<Box<dyn Renderer>>) -> Self {
        Self { renderers }
    }

    /// Every built-in renderer, in tie-break order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(json::JsonEntityRenderer),
            Box::new(json::JsonValueRenderer),
            Box::new(json::JsonServiceDocumentRenderer),
            Box::new(json::JsonErrorRenderer),
            Box::new(atom::AtomEntityRenderer),
            Box::new(atom::XmlValueRenderer),
            Box::new(atom::XmlServiceDocumentRenderer),
            Box::new(atom::XmlErrorRenderer),
            Box::new(atom::MetadataRenderer),
            Box::new(raw::RawValueRenderer),
            Box::new(batch::BatchRenderer),
        ])
    }

    /// Renderers with a non-zero score, best first; equal scores keep declaration order.
    pub fn ranked(&self, ctx: &ODataRequestContext, result: &QueryResult) -> Vec<(&dyn Renderer, i32)> {
        let mut scored: Vec<(&dyn Renderer, i32)> = self
            .renderers
            .iter()
            .map(|r| (r.as_ref(), r.score(ctx, result)))
            .filter(|(_, score)| *score > 0)
            .collect();
        // Stable: ties stay in declaration order
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
    }

    pub fn select(&self, ctx: &ODataRequestContext, result: &QueryResult) -> Option<&dyn Renderer> {
        self.ranked(ctx, result).first().map(|(renderer, _)| *renderer)
    }

    /// Renders `result` for `ctx` through the best-scoring renderer.
    pub fn render(
        &self,
        ctx: &ODataRequestContext,
        result: &ProcessorResult,
        content_length: ContentLengthPolicy,
    ) -> Result<ODataResponse> {
        let mut response = ODataResponse::new(result.status());
        for (name, value) in result.headers() {
            response.headers.insert(name.clone(), value.clone());
        }

        if !matches!(result.query_result(), QueryResult::Nothing) {
            let renderer = self.select(ctx, result.query_result()).ok_or_else(|| {
                tracing::warn!(
                    accept = ctx.header("accept").unwrap_or_default(),
                    format = ctx.uri().options.format.as_deref().unwrap_or_default(),
                    "No renderer accepts the request"
                );
                Error::NotAcceptable("no renderer can produce the requested format".to_string())
            })?;
            tracing::debug!(renderer = renderer.name(), status = %result.status(), "Rendering result");

            let render_ctx = RenderContext {
                request: ctx,
                renderers: self,
                content_length,
            };
            renderer.render(&render_ctx, result, &mut response)?;
        }

        response.headers.insert(
            ODATA_VERSION,
            HeaderValue::from_static(ODATA_VERSION_VALUE),
        );
        Ok(response)
    }
}

pub(crate) fn format_error(error: FormatError) -> Error {
    Error::Renderer(error.to_string())
}

fn target_kind(ctx: &ODataRequestContext) -> Option<TargetKind> {
    ctx.uri().target_type(&ctx.edm).map(|t| t.kind)
}

/// `$value` or `$count` requests, answered as plain text.
pub(crate) fn is_raw_request(ctx: &ODataRequestContext) -> bool {
    matches!(
        ctx.uri().resource_path().and_then(|p| p.last()),
        Some(PathSegment::Value | PathSegment::Count)
    )
}

/// Entities, or an empty collection addressed as entities.
pub(crate) fn is_entity_payload(ctx: &ODataRequestContext, result: &QueryResult) -> bool {
    match result {
        QueryResult::Single(item) => matches!(item, ResultItem::Entity(_)),
        QueryResult::Collection { items, .. } if items.is_empty() => {
            target_kind(ctx) == Some(TargetKind::Entity)
        }
        QueryResult::Collection { items, .. } => {
            items.iter().all(|item| matches!(item, ResultItem::Entity(_)))
        }
        QueryResult::RawJson(_) => true,
        _ => false,
    }
}

/// Primitive, complex or collection values, including streamed ones.
pub(crate) fn is_value_payload(ctx: &ODataRequestContext, result: &QueryResult) -> bool {
    let is_value = |item: &ResultItem| matches!(item, ResultItem::Value(_) | ResultItem::Stream(_));
    match result {
        QueryResult::Single(item) => is_value(item),
        QueryResult::Collection { items, .. } if items.is_empty() => matches!(
            target_kind(ctx),
            Some(TargetKind::Primitive | TargetKind::Complex)
        ),
        QueryResult::Collection { items, .. } => items.iter().all(is_value),
        _ => false,
    }
}

/// The model, when the URI asks for the service document.
pub(crate) fn is_service_document(ctx: &ODataRequestContext, result: &QueryResult) -> bool {
    *ctx.method() == Method::GET
        && matches!(ctx.uri().kind, UriKind::ServiceRoot)
        && matches!(result, QueryResult::Single(ResultItem::Edm(_)))
}

/// Entity set named in a context URL for the entities `ctx` addresses.
pub(crate) fn context_entity_set(ctx: &ODataRequestContext) -> Option<String> {
    let path = ctx.uri().resource_path()?;
    if let Some(set) = path.entity_set(&ctx.edm) {
        return Some(set.name.clone());
    }
    let target = path.target_type(&ctx.edm)?;
    ctx.edm
        .entity_set_for_type(&target.type_name)
        .map(|set| set.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ODataRequest;
    use crate::test_support;
    use oxidata_edm::parse_uri;
    use std::sync::Arc;

    fn context(path: &str, accept: Option<&str>) -> ODataRequestContext {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, None).unwrap();
        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert(header::ACCEPT, HeaderValue::from_str(accept).unwrap());
        }
        ODataRequestContext::new(ODataRequest::new(Method::GET, uri).with_headers(headers), edm)
    }

    fn edm_result(ctx: &ODataRequestContext) -> QueryResult {
        QueryResult::Single(crate::processor::ResultItem::Edm(ctx.edm.clone()))
    }

    #[test]
    fn test_service_document_tie_goes_to_xml_bonus() {
        let renderers = RendererSet::standard();
        let ctx = context("", None);
        let ranked = renderers.ranked(&ctx, &edm_result(&ctx));
        assert_eq!(ranked[0].0.name(), "xml-service-document");
        assert_eq!(ranked[1].0.name(), "json-service-document");
        assert_eq!(ranked[0].1 - ranked[1].1, scoring::SERVICE_DOCUMENT_XML_BONUS);
    }

    #[test]
    fn test_service_document_only_answers_get() {
        let renderers = RendererSet::standard();
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", "", None).unwrap();
        let ctx = ODataRequestContext::new(ODataRequest::new(Method::POST, uri), edm);
        let ranked = renderers.ranked(&ctx, &edm_result(&ctx));
        assert!(ranked
            .iter()
            .all(|(r, _)| !r.name().ends_with("service-document")));
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let renderers = RendererSet::standard();
        let ctx = context("Customers", Some("*/*"));
        let result = QueryResult::entities(Vec::new());
        let first: Vec<_> = renderers.ranked(&ctx, &result).iter().map(|(r, s)| (r.name(), *s)).collect();
        let second: Vec<_> = renderers.ranked(&ctx, &result).iter().map(|(r, s)| (r.name(), *s)).collect();
        assert_eq!(first, second);
        // Equal wildcard scores: JSON is declared first
        assert_eq!(first[0], ("json-entity", scoring::WILDCARD_MATCH_SCORE));
    }

    #[test]
    fn test_unmatched_accept_is_not_acceptable() {
        let renderers = RendererSet::standard();
        let ctx = context("Customers", Some("text/csv"));
        let result = ProcessorResult::new(StatusCode::OK, QueryResult::entities(Vec::new()));
        let err = renderers.render(&ctx, &result, ContentLengthPolicy::PerPart).unwrap_err();
        assert!(matches!(err, Error::NotAcceptable(_)));
    }

    #[test]
    fn test_errors_render_whatever_was_asked() {
        let renderers = RendererSet::standard();
        let ctx = Arc::new(context("Customers", Some("text/csv")));
        let result = ProcessorResult::exception(Error::EntityNotFound("Customers(9)".into()), Some(ctx.clone()));
        let response = renderers.render(&ctx, &result, ContentLengthPolicy::PerPart).unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.body_text().contains("ODATA_ENTITY_NOT_FOUND"));
    }

    #[test]
    fn test_nothing_skips_renderers_but_sets_version() {
        let renderers = RendererSet::standard();
        let ctx = context("Customers", Some("text/csv"));
        let result = ProcessorResult::new(StatusCode::NO_CONTENT, QueryResult::Nothing);
        let response = renderers.render(&ctx, &result, ContentLengthPolicy::PerPart).unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get(ODATA_VERSION).unwrap(), "4.0");
    }
}
