//! Media type scoring for renderer negotiation
//!
//! A renderer's media score is the better of two signals: how well the
//! `Accept` header matches the types it produces, and whether an explicit
//! type (`$format`, or the `Content-Type` of a non-GET request) names one of
//! them. When neither signal is present every renderer gets [`DEFAULT_SCORE`].

use crate::api::headers;
use crate::request::ODataRequestContext;
use axum::http::{header, Method};

/// Nothing expressed: no `Accept` header and no explicit type.
pub const DEFAULT_SCORE: i32 = 1;
/// Matched through `*/*` or `type/*`.
pub const WILDCARD_MATCH_SCORE: i32 = 2;
/// Exact `Accept` match with `q=1` in first position.
pub const MAXIMUM_HEADER_SCORE: i32 = 30;
/// Explicit type naming a supported media type.
pub const MAXIMUM_FORMAT_SCORE: i32 = 100;
/// Added by error renderers for exception results.
pub const ERROR_EXTRA_SCORE: i32 = 100;
/// Floor of the JSON value renderer for operation results.
pub const OPERATION_SCORE: i32 = 5;
/// Added by the XML service document renderer over default or wildcard scores.
pub const SERVICE_DOCUMENT_XML_BONUS: i32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEntry {
    /// Lower-cased `type/subtype`.
    pub media_type: String,
    pub q: f32,
}

/// `Accept` entries in header order.
pub fn parse_accept(accept: &str) -> Vec<AcceptEntry> {
    accept
        .split(',')
        .filter(|item| !item.trim().is_empty())
        .map(|item| {
            let q = headers::media_type_parameter(item, "q")
                .and_then(|q| q.parse::<f32>().ok())
                .map(|q| q.clamp(0.0, 1.0))
                .unwrap_or(1.0);
            AcceptEntry {
                media_type: headers::essence(item),
                q,
            }
        })
        .collect()
}

fn wildcard_matches(pattern: &str, media_type: &str) -> bool {
    if pattern == "*/*" {
        return true;
    }
    match (pattern.strip_suffix("/*"), media_type.split_once('/')) {
        (Some(kind), Some((actual, _))) => kind == actual,
        _ => false,
    }
}

/// Score of an `Accept` header against `supported`; 0 when nothing matches.
///
/// An exact entry scores `round(30 * q) - position`, never below
/// `WILDCARD_MATCH_SCORE + 1`. Entries with `q=0` never match.
pub fn accept_score(accept: &str, supported: &[&str]) -> i32 {
    parse_accept(accept)
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.q > 0.0)
        .map(|(position, entry)| {
            if supported.iter().any(|s| *s == entry.media_type) {
                let score = (MAXIMUM_HEADER_SCORE as f32 * entry.q).round() as i32 - position as i32;
                score.max(WILDCARD_MATCH_SCORE + 1)
            } else if supported.iter().any(|s| wildcard_matches(&entry.media_type, s)) {
                WILDCARD_MATCH_SCORE
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0)
}

/// Media type a `$format` value stands for.
pub fn format_media_type(format: &str) -> String {
    match format.trim().to_ascii_lowercase().as_str() {
        "json" => "application/json".to_string(),
        "xml" => "application/xml".to_string(),
        "atom" => "application/atom+xml".to_string(),
        _ => headers::essence(format),
    }
}

/// `$format`, or the `Content-Type` of a request that carries a body.
pub fn explicit_media_type(ctx: &ODataRequestContext) -> Option<String> {
    if let Some(format) = &ctx.uri().options.format {
        return Some(format_media_type(format));
    }
    if *ctx.method() != Method::GET {
        return headers::content_type(ctx.headers()).map(headers::essence);
    }
    None
}

/// Combined media score of a renderer producing `supported` for this request.
pub fn media_score(ctx: &ODataRequestContext, supported: &[&str]) -> i32 {
    let accept = ctx
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());
    let explicit = explicit_media_type(ctx);

    if accept.is_none() && explicit.is_none() {
        return DEFAULT_SCORE;
    }
    let from_accept = accept.map(|a| accept_score(a, supported)).unwrap_or(0);
    let from_explicit = explicit
        .map(|t| {
            if supported.iter().any(|s| *s == t) {
                MAXIMUM_FORMAT_SCORE
            } else {
                0
            }
        })
        .unwrap_or(0);
    from_accept.max(from_explicit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ODataRequest;
    use crate::test_support;
    use axum::http::{HeaderMap, HeaderValue};
    use oxidata_edm::parse_uri;

    const JSON: &[&str] = &["application/json"];
    const XML: &[&str] = &["application/atom+xml", "application/xml"];

    fn context(method: Method, query: Option<&str>, headers: &[(&'static str, &str)]) -> ODataRequestContext {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", "Customers", query).unwrap();
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        ODataRequestContext::new(ODataRequest::new(method, uri).with_headers(map), edm)
    }

    #[test]
    fn test_exact_match_decays_with_position_and_quality() {
        assert_eq!(accept_score("application/json", JSON), 30);
        assert_eq!(accept_score("application/xml, application/json", JSON), 29);
        assert_eq!(accept_score("application/json;q=0.5", JSON), 15);
        // Floored above the wildcard score
        assert_eq!(accept_score("application/json;q=0.01", JSON), WILDCARD_MATCH_SCORE + 1);
    }

    #[test]
    fn test_wildcards_and_exclusions() {
        assert_eq!(accept_score("*/*", JSON), WILDCARD_MATCH_SCORE);
        assert_eq!(accept_score("application/*", XML), WILDCARD_MATCH_SCORE);
        assert_eq!(accept_score("text/*", JSON), 0);
        assert_eq!(accept_score("application/json;q=0", JSON), 0);
        assert_eq!(accept_score("text/csv", JSON), 0);
    }

    #[test]
    fn test_default_only_without_any_signal() {
        let ctx = context(Method::GET, None, &[]);
        assert_eq!(media_score(&ctx, JSON), DEFAULT_SCORE);
        assert_eq!(media_score(&ctx, XML), DEFAULT_SCORE);
    }

    #[test]
    fn test_format_overrides_accept() {
        let ctx = context(Method::GET, Some("$format=atom"), &[("accept", "application/json")]);
        assert_eq!(media_score(&ctx, XML), MAXIMUM_FORMAT_SCORE);
        assert_eq!(media_score(&ctx, JSON), 30);
    }

    #[test]
    fn test_unknown_format_scores_zero() {
        let ctx = context(Method::GET, Some("$format=csv"), &[]);
        assert_eq!(media_score(&ctx, JSON), 0);
    }

    #[test]
    fn test_content_type_counts_for_writes_only() {
        let headers = [("content-type", "application/json")];
        assert_eq!(media_score(&context(Method::POST, None, &headers), JSON), MAXIMUM_FORMAT_SCORE);
        assert_eq!(media_score(&context(Method::GET, None, &headers), JSON), DEFAULT_SCORE);
    }
}
