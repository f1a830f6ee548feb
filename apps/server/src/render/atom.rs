//! Atom and XML renderers, plus the CSDL `$metadata` document.

use super::json::{collect_values, value_type_name};
use super::scoring::{self, DEFAULT_SCORE, ERROR_EXTRA_SCORE, SERVICE_DOCUMENT_XML_BONUS, WILDCARD_MATCH_SCORE};
use super::{
    context_entity_set, format_error, is_entity_payload, is_raw_request, is_service_document,
    is_value_payload, ODataResponse, RenderContext, Renderer,
};
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult, ResultItem};
use crate::request::ODataRequestContext;
use oxidata_edm::{TypeRef, UriKind};
use oxidata_format::{atom, csdl};

pub const ATOM_MEDIA_TYPES: &[&str] = &["application/atom+xml", "application/xml"];
pub const XML_MEDIA_TYPES: &[&str] = &["application/xml"];
pub const SERVICE_DOCUMENT_MEDIA_TYPES: &[&str] = &["application/atomsvc+xml", "application/xml"];
pub const XML_CONTENT_TYPE: &str = "application/xml";

/// Atom entries and feeds. `$ref` results are left to JSON.
pub struct AtomEntityRenderer;

impl Renderer for AtomEntityRenderer {
    fn name(&self) -> &'static str {
        "atom-entity"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if ctx.uri().is_ref()
            || matches!(result, QueryResult::RawJson(_))
            || !is_entity_payload(ctx, result)
        {
            return 0;
        }
        scoring::media_score(ctx, ATOM_MEDIA_TYPES)
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let request = ctx.request;
        let root = request.service_root();
        let metadata = format!("{root}/$metadata");
        let set = context_entity_set(request);

        match result.query_result() {
            QueryResult::Single(ResultItem::Entity(entity)) => {
                let context = set.map(|s| format!("{metadata}#{s}/$entity"));
                let xml = atom::write_entry_document(&request.edm, entity, root, context.as_deref())
                    .map_err(format_error)?;
                response.set_content_type("application/atom+xml;type=entry")?;
                response.set_body(xml);
            }
            QueryResult::Collection { items, count } => {
                let entities: Vec<_> = items
                    .iter()
                    .filter_map(|item| match item {
                        ResultItem::Entity(entity) => Some(entity.clone()),
                        _ => None,
                    })
                    .collect();
                let feed_id = match &set {
                    Some(s) => format!("{root}/{s}"),
                    None => root.to_string(),
                };
                let context = set.map(|s| format!("{metadata}#{s}"));
                let xml = atom::write_feed_document(
                    &request.edm,
                    &entities,
                    root,
                    &feed_id,
                    *count,
                    context.as_deref(),
                )
                .map_err(format_error)?;
                response.set_content_type("application/atom+xml;type=feed")?;
                response.set_body(xml);
            }
            _ => return Err(Error::Renderer("unexpected entity result".to_string())),
        }
        Ok(())
    }
}

/// `<metadata:value>` documents for properties and operation values.
pub struct XmlValueRenderer;

impl Renderer for XmlValueRenderer {
    fn name(&self) -> &'static str {
        "xml-value"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if is_raw_request(ctx) || !is_value_payload(ctx, result) {
            return 0;
        }
        scoring::media_score(ctx, XML_MEDIA_TYPES)
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let request = ctx.request;
        let value = collect_values(result.query_result())?;
        let type_name = value_type_name(request, Some(&value)).ok_or_else(|| {
            Error::Renderer("cannot determine the type of the value result".to_string())
        })?;
        let context = format!("{}/$metadata#{type_name}", request.service_root());
        let xml = atom::write_value_document(
            &request.edm,
            &value,
            &TypeRef::parse(&type_name),
            Some(&context),
        )
        .map_err(format_error)?;
        response.set_content_type(XML_CONTENT_TYPE)?;
        response.set_body(xml);
        Ok(())
    }
}

/// AtomPub service document.
pub struct XmlServiceDocumentRenderer;

impl Renderer for XmlServiceDocumentRenderer {
    fn name(&self) -> &'static str {
        "xml-service-document"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if !is_service_document(ctx, result) {
            return 0;
        }
        let score = scoring::media_score(ctx, SERVICE_DOCUMENT_MEDIA_TYPES);
        if score == DEFAULT_SCORE || score == WILDCARD_MATCH_SCORE {
            score + SERVICE_DOCUMENT_XML_BONUS
        } else {
            score
        }
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        _result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let xml = atom::write_service_document(&ctx.request.edm, ctx.request.service_root())
            .map_err(format_error)?;
        response.set_content_type("application/atomsvc+xml")?;
        response.set_body(xml);
        Ok(())
    }
}

pub struct XmlErrorRenderer;

impl Renderer for XmlErrorRenderer {
    fn name(&self) -> &'static str {
        "xml-error"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        match result {
            QueryResult::Exception(_) => scoring::media_score(ctx, XML_MEDIA_TYPES) + ERROR_EXTRA_SCORE,
            _ => 0,
        }
    }

    fn render(
        &self,
        _ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let error = result
            .query_result()
            .as_exception()
            .ok_or_else(|| Error::Renderer("error renderer needs an exception".to_string()))?;
        let xml = atom::write_error(error.code(), &error.to_string(), error.target())
            .map_err(format_error)?;
        response.set_content_type(XML_CONTENT_TYPE)?;
        response.set_body(xml);
        Ok(())
    }
}

/// CSDL document for `$metadata`; answers any acceptable request for it.
pub struct MetadataRenderer;

impl Renderer for MetadataRenderer {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if !matches!(ctx.uri().kind, UriKind::Metadata)
            || !matches!(result, QueryResult::Single(ResultItem::Edm(_)))
        {
            return 0;
        }
        scoring::media_score(ctx, XML_MEDIA_TYPES).max(DEFAULT_SCORE)
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        _result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let xml = csdl::write_metadata(&ctx.request.edm).map_err(format_error)?;
        response.set_content_type(XML_CONTENT_TYPE)?;
        response.set_body(xml);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ContentLengthPolicy, RendererSet};
    use crate::request::ODataRequest;
    use crate::test_support;
    use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
    use oxidata_edm::parse_uri;
    use std::sync::Arc;

    fn render(path: &str, accept: &str, result: QueryResult) -> ODataResponse {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, None).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(accept).unwrap());
        let ctx = Arc::new(ODataRequestContext::new(
            ODataRequest::new(Method::GET, uri).with_headers(headers),
            edm,
        ));
        let result = ProcessorResult::from_parts(StatusCode::OK, result, Default::default(), Some(ctx.clone()));
        RendererSet::standard()
            .render(&ctx, &result, ContentLengthPolicy::PerPart)
            .unwrap()
    }

    #[test]
    fn test_entry_round_trips_through_reader() {
        let edm = test_support::edm();
        let response = render(
            "Customers(1)",
            "application/atom+xml",
            QueryResult::entity(test_support::customer(1, "Ann")),
        );
        assert_eq!(response.content_type(), Some("application/atom+xml;type=entry"));
        let entity = atom::read_entry(&edm, &response.body_text(), Some("Demo.Customer")).unwrap();
        assert_eq!(entity, test_support::customer(1, "Ann"));
    }

    #[test]
    fn test_feed_for_entity_sets() {
        let response = render(
            "Customers",
            "application/atom+xml",
            QueryResult::entities(vec![test_support::customer(1, "Ann"), test_support::customer(2, "Bob")]),
        );
        assert_eq!(response.content_type(), Some("application/atom+xml;type=feed"));
        let feed = atom::read_feed(&test_support::edm(), &response.body_text(), Some("Demo.Customer")).unwrap();
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_metadata_is_csdl() {
        let response = render(
            "$metadata",
            "application/json",
            QueryResult::Single(ResultItem::Edm(test_support::edm())),
        );
        assert_eq!(response.content_type(), Some(XML_CONTENT_TYPE));
        assert!(response.body_text().contains("edmx:Edmx"));
    }

    #[test]
    fn test_xml_error_document() {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", "Customers", Some("$format=xml")).unwrap();
        let ctx = Arc::new(ODataRequestContext::new(ODataRequest::new(Method::GET, uri), edm));
        let result = ProcessorResult::exception(Error::bad_request_at("bad", "Name"), Some(ctx.clone()));
        let response = RendererSet::standard()
            .render(&ctx, &result, ContentLengthPolicy::PerPart)
            .unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.content_type(), Some(XML_CONTENT_TYPE));
        assert!(response.body_text().contains("ODATA_BAD_REQUEST"));
    }
}
