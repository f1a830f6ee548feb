//! `multipart/mixed` responses for `$batch`.
//!
//! One `application/http` part per item. Items of the same changeset are
//! grouped under a nested boundary named after the changeset, closed once
//! the declared number of items has been written.

use super::scoring::{self, DEFAULT_SCORE, ERROR_EXTRA_SCORE};
use super::{ContentLengthPolicy, ODataResponse, RenderContext, Renderer};
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult, ResultItem};
use crate::request::ODataRequestContext;
use axum::http::{header, Method, StatusCode};
use oxidata_edm::UriKind;
use std::fmt::Write as _;
use uuid::Uuid;

pub const MULTIPART_MEDIA_TYPES: &[&str] = &["multipart/mixed"];

const CRLF: &str = "\r\n";

pub struct BatchRenderer;

struct OpenChangeSet {
    id: String,
    size: usize,
    written: usize,
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
}

fn content_length_line(policy: ContentLengthPolicy, body_len: usize) -> Option<String> {
    let length = match policy {
        ContentLengthPolicy::PerPart => Some(body_len),
        ContentLengthPolicy::FromRequest(length) => length,
    };
    length.map(|l| format!("Content-Length: {l}"))
}

impl BatchRenderer {
    /// Inline status line and message; only not-found keeps its own status.
    fn exception_part(&self, error: &Error, policy: ContentLengthPolicy) -> Vec<u8> {
        let status = match error {
            Error::EntityNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        let message = error.to_string();
        let mut head = status_line(status) + CRLF;
        head.push_str("Content-Type: text/plain");
        head.push_str(CRLF);
        if let Some(line) = content_length_line(policy, message.len()) {
            head.push_str(&line);
            head.push_str(CRLF);
        }
        head.push_str(CRLF);
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(message.as_bytes());
        bytes
    }

    /// A batch that failed as a whole: one part carrying the inline exception.
    fn render_exception(
        &self,
        ctx: &RenderContext<'_>,
        error: &Error,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let boundary = format!("batch_{}", Uuid::new_v4());
        let mut body = format!(
            "--{boundary}{CRLF}Content-Type: application/http{CRLF}Content-Transfer-Encoding: binary{CRLF}{CRLF}"
        )
        .into_bytes();
        body.extend_from_slice(&self.exception_part(error, ctx.content_length));
        body.extend_from_slice(format!("{CRLF}--{boundary}--{CRLF}").as_bytes());

        response.set_content_type(&format!("multipart/mixed; boundary={boundary}"))?;
        response.set_body(body);
        Ok(())
    }

    fn item_part(
        &self,
        ctx: &RenderContext<'_>,
        item: &ProcessorResult,
    ) -> Result<Vec<u8>> {
        if let QueryResult::Exception(error) = item.query_result() {
            return Ok(self.exception_part(error, ctx.content_length));
        }
        let item_ctx = item.request_context().map(|c| c.as_ref()).unwrap_or(ctx.request);
        let inner = match ctx.renderers.render(item_ctx, item, ctx.content_length) {
            Ok(inner) => inner,
            Err(error) => return Ok(self.exception_part(&error, ctx.content_length)),
        };

        let mut head = status_line(inner.status) + CRLF;
        for (name, value) in &inner.headers {
            if *name == header::CONTENT_LENGTH {
                continue;
            }
            let value = value.to_str().map_err(|_| {
                Error::Renderer(format!("header {name} is not printable"))
            })?;
            let _ = write!(head, "{name}: {value}{CRLF}");
        }
        if !inner.body.is_empty() || inner.status != StatusCode::NO_CONTENT {
            if let Some(line) = content_length_line(ctx.content_length, inner.body.len()) {
                head.push_str(&line);
                head.push_str(CRLF);
            }
        }
        head.push_str(CRLF);
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&inner.body);
        Ok(bytes)
    }
}

impl Renderer for BatchRenderer {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if !matches!(ctx.uri().kind, UriKind::Batch) {
            return 0;
        }
        if let QueryResult::Exception(_) = result {
            if *ctx.method() != Method::POST {
                return 0;
            }
            return scoring::media_score(ctx, MULTIPART_MEDIA_TYPES).max(DEFAULT_SCORE)
                + ERROR_EXTRA_SCORE;
        }
        let is_batch_result = matches!(
            result,
            QueryResult::Collection { items, .. }
                if items.iter().all(|i| matches!(i, ResultItem::Batch(_)))
        );
        if !is_batch_result {
            return 0;
        }
        scoring::media_score(ctx, MULTIPART_MEDIA_TYPES).max(DEFAULT_SCORE)
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let items = match result.query_result() {
            QueryResult::Collection { items, .. } => items,
            QueryResult::Exception(error) => return self.render_exception(ctx, error, response),
            _ => return Err(Error::Renderer("batch result must be a collection".to_string())),
        };

        let boundary = format!("batch_{}", Uuid::new_v4());
        let mut body: Vec<u8> = Vec::new();
        let mut open: Option<OpenChangeSet> = None;

        for item in items {
            let ResultItem::Batch(item) = item else {
                continue;
            };
            let item_ctx = item.request_context();
            let changeset = item_ctx.and_then(|c| c.changeset());

            if let Some(current) = &open {
                if changeset.map(|c| c.id.as_str()) != Some(current.id.as_str()) {
                    body.extend_from_slice(format!("--{}--{CRLF}", current.id).as_bytes());
                    open = None;
                }
            }
            if let (None, Some(changeset)) = (&open, changeset) {
                body.extend_from_slice(
                    format!(
                        "--{boundary}{CRLF}Content-Type: multipart/mixed; boundary={}{CRLF}{CRLF}",
                        changeset.id
                    )
                    .as_bytes(),
                );
                open = Some(OpenChangeSet {
                    id: changeset.id.clone(),
                    size: changeset.size,
                    written: 0,
                });
            }

            let delimiter = open.as_ref().map(|c| c.id.as_str()).unwrap_or(boundary.as_str());
            let mut part_head = format!(
                "--{delimiter}{CRLF}Content-Type: application/http{CRLF}Content-Transfer-Encoding: binary{CRLF}"
            );
            if let Some(id) = item_ctx
                .and_then(|c| c.batch_item.as_ref())
                .and_then(|b| b.content_id.as_deref())
            {
                let _ = write!(part_head, "Content-ID: {id}{CRLF}");
            }
            part_head.push_str(CRLF);
            body.extend_from_slice(part_head.as_bytes());
            body.extend_from_slice(&self.item_part(ctx, item)?);
            body.extend_from_slice(CRLF.as_bytes());

            if let Some(current) = open.as_mut() {
                current.written += 1;
                if current.written >= current.size {
                    body.extend_from_slice(format!("--{}--{CRLF}", current.id).as_bytes());
                    open = None;
                }
            }
        }
        if let Some(current) = open {
            body.extend_from_slice(format!("--{}--{CRLF}", current.id).as_bytes());
        }
        body.extend_from_slice(format!("--{boundary}--{CRLF}").as_bytes());

        response.set_content_type(&format!("multipart/mixed; boundary={boundary}"))?;
        response.set_body(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RendererSet;
    use crate::request::{BatchItem, ChangeSetInfo, ODataRequest};
    use crate::test_support;
    use axum::http::{HeaderMap, Method};
    use oxidata_edm::parse_uri;
    use std::sync::Arc;

    fn part_ctx(method: Method, path: &str, changeset: Option<(&str, usize)>) -> Arc<ODataRequestContext> {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, None).unwrap();
        let item = BatchItem {
            content_id: None,
            changeset: changeset.map(|(id, size)| ChangeSetInfo {
                id: id.to_string(),
                size,
            }),
        };
        Arc::new(ODataRequestContext::for_batch_item(ODataRequest::new(method, uri), edm, item))
    }

    fn render(items: Vec<ProcessorResult>, policy: ContentLengthPolicy) -> String {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", "$batch", None).unwrap();
        let ctx = Arc::new(ODataRequestContext::new(ODataRequest::new(Method::POST, uri), edm));
        let result = ProcessorResult::from_parts(
            StatusCode::OK,
            QueryResult::Collection {
                items: items.into_iter().map(|r| ResultItem::Batch(Box::new(r))).collect(),
                count: None,
            },
            HeaderMap::new(),
            Some(ctx.clone()),
        );
        let response = RendererSet::standard().render(&ctx, &result, policy).unwrap();
        assert!(response.content_type().unwrap().starts_with("multipart/mixed; boundary=batch_"));
        response.body_text()
    }

    #[test]
    fn test_changeset_items_share_a_nested_boundary() {
        let get = part_ctx(Method::GET, "Customers(1)", None);
        let first = part_ctx(Method::DELETE, "Orders(10)", Some(("cs1", 2)));
        let second = part_ctx(Method::DELETE, "Orders(11)", Some(("cs1", 2)));
        let body = render(
            vec![
                ProcessorResult::from_parts(
                    StatusCode::OK,
                    QueryResult::entity(test_support::customer(1, "Ann")),
                    HeaderMap::new(),
                    Some(get),
                ),
                ProcessorResult::from_parts(StatusCode::NO_CONTENT, QueryResult::Nothing, HeaderMap::new(), Some(first)),
                ProcessorResult::from_parts(StatusCode::NO_CONTENT, QueryResult::Nothing, HeaderMap::new(), Some(second)),
            ],
            ContentLengthPolicy::PerPart,
        );

        assert!(body.contains("HTTP/1.1 200 OK"));
        assert!(body.contains("Content-Type: multipart/mixed; boundary=cs1"));
        assert_eq!(body.matches("--cs1\r\n").count(), 2);
        assert_eq!(body.matches("--cs1--").count(), 1);
        assert_eq!(body.matches("HTTP/1.1 204 No Content").count(), 2);
        assert!(body.trim_end().ends_with("--"));
    }

    #[test]
    fn test_exceptions_are_inline_status_lines() {
        let missing = part_ctx(Method::GET, "Customers(9)", None);
        let invalid = part_ctx(Method::GET, "Customers", None);
        let body = render(
            vec![
                ProcessorResult::exception(Error::EntityNotFound("Customers(9)".into()), Some(missing)),
                ProcessorResult::exception(Error::DataSource("boom".into()), Some(invalid)),
            ],
            ContentLengthPolicy::PerPart,
        );
        assert!(body.contains("HTTP/1.1 404 Not Found\r\nContent-Type: text/plain"));
        assert!(body.contains("HTTP/1.1 400 Bad Request"));
        assert!(body.contains("Entity not found: Customers(9)"));
    }

    #[test]
    fn test_failed_batch_is_one_inline_exception() {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", "$batch", None).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "multipart/mixed; boundary=b".parse().unwrap());
        let ctx = Arc::new(ODataRequestContext::new(
            ODataRequest::new(Method::POST, uri).with_headers(headers),
            edm,
        ));
        let result = ProcessorResult::exception(Error::bad_request("batch body is not closed"), Some(ctx.clone()));

        let renderers = RendererSet::standard();
        assert_eq!(renderers.select(&ctx, result.query_result()).map(|r| r.name()), Some("batch"));

        let response = renderers.render(&ctx, &result, ContentLengthPolicy::PerPart).unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.content_type().unwrap().starts_with("multipart/mixed; boundary=batch_"));
        let body = response.body_text();
        assert!(body.contains("HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain"));
        assert!(body.contains("batch body is not closed"));
        assert!(body.trim_end().ends_with("--"));
    }

    #[test]
    fn test_content_length_policy() {
        let item = || {
            let ctx = part_ctx(Method::GET, "Customers(9)", None);
            vec![ProcessorResult::exception(Error::EntityNotFound("x".into()), Some(ctx))]
        };
        let message_len = Error::EntityNotFound("x".into()).to_string().len();

        let per_part = render(item(), ContentLengthPolicy::PerPart);
        assert!(per_part.contains(&format!("Content-Length: {message_len}")));

        let legacy = render(item(), ContentLengthPolicy::FromRequest(Some(512)));
        assert!(legacy.contains("Content-Length: 512"));

        let omitted = render(item(), ContentLengthPolicy::FromRequest(None));
        assert!(!omitted.contains("Content-Length"));
    }
}
