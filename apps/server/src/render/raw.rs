//! Raw values for `$value` and `$count`.

use super::scoring::{self, DEFAULT_SCORE};
use super::{is_raw_request, ODataResponse, RenderContext, Renderer};
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult, ResultItem};
use crate::request::ODataRequestContext;
use axum::http::StatusCode;
use oxidata_edm::{PrimitiveValue, Value};

pub const TEXT_MEDIA_TYPES: &[&str] = &["text/plain"];

pub struct RawValueRenderer;

impl Renderer for RawValueRenderer {
    fn name(&self) -> &'static str {
        "raw-value"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if !is_raw_request(ctx) || !matches!(result, QueryResult::Single(ResultItem::Value(_))) {
            return 0;
        }
        scoring::media_score(ctx, TEXT_MEDIA_TYPES).max(DEFAULT_SCORE)
    }

    fn render(
        &self,
        _ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        match result.query_result() {
            QueryResult::Single(ResultItem::Value(Value::Null)) => {
                response.status = StatusCode::NO_CONTENT;
            }
            QueryResult::Single(ResultItem::Value(Value::Primitive(PrimitiveValue::Binary(bytes)))) => {
                response.set_content_type("application/octet-stream")?;
                response.set_body(bytes.clone());
            }
            QueryResult::Single(ResultItem::Value(Value::Primitive(value))) => {
                response.set_content_type("text/plain;charset=utf-8")?;
                response.set_body(value.to_text());
            }
            _ => {
                return Err(Error::Renderer(
                    "raw values must be primitive".to_string(),
                ))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ContentLengthPolicy, RendererSet};
    use crate::request::ODataRequest;
    use crate::test_support;
    use axum::http::{header, HeaderMap, HeaderValue, Method};
    use oxidata_edm::parse_uri;

    fn render(path: &str, accept: &str, value: Value) -> ODataResponse {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, None).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(accept).unwrap());
        let ctx = ODataRequestContext::new(ODataRequest::new(Method::GET, uri).with_headers(headers), edm);
        let result = ProcessorResult::new(StatusCode::OK, QueryResult::value(value));
        RendererSet::standard()
            .render(&ctx, &result, ContentLengthPolicy::PerPart)
            .unwrap()
    }

    #[test]
    fn test_count_is_plain_text_even_when_json_is_asked() {
        let response = render("Customers/$count", "application/json", PrimitiveValue::Int64(2).into());
        assert_eq!(response.body_text(), "2");
        assert_eq!(response.content_type(), Some("text/plain;charset=utf-8"));
    }

    #[test]
    fn test_null_value_is_no_content() {
        let response = render("Orders(10)/Note/$value", "*/*", Value::Null);
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.body.is_empty());
    }
}
