//! `multipart/mixed` batch request parsing.
//!
//! A batch body is a sequence of `application/http` parts (queries) and
//! nested `multipart/mixed` parts (changesets). Each `application/http` part
//! carries a request line, headers, a blank line and an optional body.

use crate::api::headers;
use crate::error::{Error, Result};
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

#[derive(Debug, Clone)]
pub struct BatchPart {
    pub content_id: Option<String>,
    pub method: Method,
    /// Request target as written: absolute URL, absolute path or relative to the service root.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub enum BatchEntry {
    Query(BatchPart),
    ChangeSet { id: String, parts: Vec<BatchPart> },
}

impl BatchEntry {
    pub fn len(&self) -> usize {
        match self {
            BatchEntry::Query(_) => 1,
            BatchEntry::ChangeSet { parts, .. } => parts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses a batch body delimited by `boundary`.
pub fn parse_batch(body: &[u8], boundary: &str) -> Result<Vec<BatchEntry>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::Unmarshaller(format!("batch body is not UTF-8: {e}")))?;

    split_parts(text, boundary)?
        .into_iter()
        .map(|part| {
            let (mime, content) = split_head(part);
            let mime = parse_headers(mime)?;
            let content_type = headers::content_type(&mime).unwrap_or("application/http");
            match headers::essence(content_type).as_str() {
                "multipart/mixed" => {
                    let id = headers::multipart_boundary(content_type).ok_or_else(|| {
                        Error::bad_request("changeset part has no boundary")
                    })?;
                    let parts = split_parts(content, &id)?
                        .into_iter()
                        .map(|inner| {
                            let (inner_mime, inner_content) = split_head(inner);
                            let inner_mime = parse_headers(inner_mime)?;
                            parse_http(&inner_mime, inner_content)
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok(BatchEntry::ChangeSet { id, parts })
                }
                "application/http" => Ok(BatchEntry::Query(parse_http(&mime, content)?)),
                other => Err(Error::bad_request(format!(
                    "unsupported batch part content type {other}"
                ))),
            }
        })
        .collect()
}

/// Bodies between `--boundary` delimiters, up to the closing `--boundary--`.
fn split_parts<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>> {
    let delimiter = format!("--{boundary}");
    let mut segments = body.split(delimiter.as_str());
    // Preamble
    segments.next();

    let mut parts = Vec::new();
    for segment in segments {
        if segment.starts_with("--") {
            return Ok(parts);
        }
        let segment = segment
            .trim_start_matches([' ', '\t'])
            .strip_prefix("\r\n")
            .or_else(|| segment.strip_prefix('\n'))
            .unwrap_or(segment);
        let segment = segment
            .strip_suffix("\r\n")
            .or_else(|| segment.strip_suffix('\n'))
            .unwrap_or(segment);
        parts.push(segment);
    }
    Err(Error::bad_request(format!(
        "batch body is not closed by --{boundary}--"
    )))
}

/// Splits a part into its header block and content at the first blank line.
fn split_head(part: &str) -> (&str, &str) {
    if let Some(idx) = part.find("\r\n\r\n") {
        (&part[..idx], &part[idx + 4..])
    } else if let Some(idx) = part.find("\n\n") {
        (&part[..idx], &part[idx + 2..])
    } else {
        (part, "")
    }
}

fn parse_headers(block: &str) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for line in block.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::bad_request(format!("malformed batch header: {line}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| Error::bad_request(format!("invalid batch header name: {name}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| Error::bad_request(format!("invalid value for batch header {name}")))?;
        map.append(name, value);
    }
    Ok(map)
}

fn parse_http(mime: &HeaderMap, content: &str) -> Result<BatchPart> {
    let (head, body) = split_head(content);
    let mut lines = head.lines();
    let request_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::bad_request("batch part has no request line"))?;

    let mut fields = request_line.split_whitespace();
    let (method, url) = match (fields.next(), fields.next()) {
        (Some(method), Some(url)) => (method, url),
        _ => {
            return Err(Error::bad_request(format!(
                "malformed batch request line: {request_line}"
            )))
        }
    };
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::bad_request(format!("invalid method in batch part: {method}")))?;

    let headers = parse_headers(&lines.collect::<Vec<_>>().join("\n"))?;
    let content_id = mime
        .get("content-id")
        .or_else(|| headers.get("content-id"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok(BatchPart {
        content_id,
        method,
        url: url.to_string(),
        headers,
        body: Bytes::copy_from_slice(body.as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "--batch_1\r\n\
Content-Type: application/http\r\n\
Content-Transfer-Encoding: binary\r\n\
\r\n\
GET Customers(1) HTTP/1.1\r\n\
Accept: application/json\r\n\
\r\n\
\r\n\
--batch_1\r\n\
Content-Type: multipart/mixed; boundary=changeset_a\r\n\
\r\n\
--changeset_a\r\n\
Content-Type: application/http\r\n\
Content-ID: 1\r\n\
\r\n\
POST Customers HTTP/1.1\r\n\
Content-Type: application/json\r\n\
\r\n\
{\"Id\":3,\"Name\":\"Cid\"}\r\n\
--changeset_a\r\n\
Content-Type: application/http\r\n\
Content-ID: 2\r\n\
\r\n\
DELETE Orders(20) HTTP/1.1\r\n\
\r\n\
\r\n\
--changeset_a--\r\n\
\r\n\
--batch_1--\r\n";

    #[test]
    fn test_queries_and_changesets_are_separated() {
        let entries = parse_batch(BODY.as_bytes(), "batch_1").unwrap();
        assert_eq!(entries.len(), 2);

        match &entries[0] {
            BatchEntry::Query(part) => {
                assert_eq!(part.method, Method::GET);
                assert_eq!(part.url, "Customers(1)");
                assert_eq!(part.headers.get("accept").unwrap(), "application/json");
            }
            other => panic!("unexpected {other:?}"),
        }

        match &entries[1] {
            BatchEntry::ChangeSet { id, parts } => {
                assert_eq!(id, "changeset_a");
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0].content_id.as_deref(), Some("1"));
                assert_eq!(&parts[0].body[..], br#"{"Id":3,"Name":"Cid"}"#);
                assert_eq!(parts[1].method, Method::DELETE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_body_is_rejected() {
        let body = "--b\r\nContent-Type: application/http\r\n\r\nGET Customers HTTP/1.1\r\n\r\n";
        assert!(parse_batch(body.as_bytes(), "b").is_err());
    }

    #[test]
    fn test_malformed_request_line_is_rejected() {
        let body = "--b\r\nContent-Type: application/http\r\n\r\nGET\r\n\r\n--b--";
        assert!(parse_batch(body.as_bytes(), "b").is_err());
    }
}
