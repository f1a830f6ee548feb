//! OData HTTP Header Handling
//!
//! Parsing and formatting of the headers the OData pipeline reads or writes.
//!
//! # Supported Headers
//!
//! ## Request Headers
//! - `Accept` - Renderer negotiation (scored in [`crate::render::scoring`])
//! - `Content-Type` - Payload format; also an explicit format for non-GET requests
//! - `Prefer` - `return=minimal` / `return=representation`
//! - `Transfer-Encoding` / `X-Transfer-Encoding` - `chunked` selects streamed operation results
//!
//! ## Response Headers
//! - `OData-Version` - Always `4.0` on rendered responses
//! - `Location` - Canonical URL of a created entity
//! - `Preference-Applied` - Echoes an honoured `Prefer` value

use axum::http::{header, HeaderMap, HeaderValue};

pub const ODATA_VERSION: &str = "odata-version";
pub const ODATA_VERSION_VALUE: &str = "4.0";
pub const PREFERENCE_APPLIED: &str = "preference-applied";
pub const X_TRANSFER_ENCODING: &str = "x-transfer-encoding";

// ============================================================================
// Prefer Header Handling
// ============================================================================

/// Prefer header return preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferReturn {
    /// Status and headers only, no entity payload
    Minimal,
    /// Full entity representation
    #[default]
    Representation,
}

/// Extract Prefer header return preference
///
/// # Examples
/// ```
/// use axum::http::HeaderMap;
/// use oxidata::api::headers::{extract_prefer_return, PreferReturn};
/// let mut headers = HeaderMap::new();
/// headers.insert("prefer", "return=minimal".parse().unwrap());
/// assert_eq!(extract_prefer_return(&headers), PreferReturn::Minimal);
/// ```
pub fn extract_prefer_return(headers: &HeaderMap) -> PreferReturn {
    let prefer_value = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase());

    match prefer_value {
        Some(prefer) if prefer.contains("return=representation") => PreferReturn::Representation,
        Some(prefer) if prefer.contains("return=minimal") => PreferReturn::Minimal,
        _ => PreferReturn::default(),
    }
}

/// Check if client prefers minimal response
pub fn prefer_minimal(headers: &HeaderMap) -> bool {
    extract_prefer_return(headers) == PreferReturn::Minimal
}

/// Headers a write handler attaches when `return=minimal` was honoured
pub fn preference_applied_minimal(headers: &mut HeaderMap) {
    headers.insert(
        PREFERENCE_APPLIED,
        HeaderValue::from_static("return=minimal"),
    );
}

// ============================================================================
// Transfer Encoding
// ============================================================================

/// Check if the client asked for a chunked (streamed) response
///
/// Either `Transfer-Encoding` or the proxy-safe `X-Transfer-Encoding` counts.
///
/// # Examples
/// ```
/// use axum::http::HeaderMap;
/// use oxidata::api::headers::is_chunked;
/// let mut headers = HeaderMap::new();
/// assert!(!is_chunked(&headers));
/// headers.insert("x-transfer-encoding", "Chunked".parse().unwrap());
/// assert!(is_chunked(&headers));
/// ```
pub fn is_chunked(headers: &HeaderMap) -> bool {
    [header::TRANSFER_ENCODING.as_str(), X_TRANSFER_ENCODING]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"))
}

// ============================================================================
// Content Type Handling
// ============================================================================

/// Raw `Content-Type` header value
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
}

/// Lower-cased `type/subtype` of a media type, parameters removed
///
/// # Examples
/// ```
/// use oxidata::api::headers::essence;
/// assert_eq!(essence("Application/JSON; odata.metadata=minimal"), "application/json");
/// ```
pub fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Value of a media type parameter, quotes removed
pub fn media_type_parameter(media_type: &str, name: &str) -> Option<String> {
    media_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// `boundary` parameter of a `multipart/*` content type
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    if !essence(content_type).starts_with("multipart/") {
        return None;
    }
    media_type_parameter(content_type, "boundary").filter(|b| !b.is_empty())
}

/// Declared request `Content-Length`
pub fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefer_return() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_prefer_return(&headers), PreferReturn::Representation);

        headers.insert("prefer", "odata.maxpagesize=10, Return=Minimal".parse().unwrap());
        assert!(prefer_minimal(&headers));

        headers.insert("prefer", "return=representation".parse().unwrap());
        assert!(!prefer_minimal(&headers));
    }

    #[test]
    fn test_chunked_transfer_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", "gzip, chunked".parse().unwrap());
        assert!(is_chunked(&headers));
    }

    #[test]
    fn test_multipart_boundary() {
        assert_eq!(
            multipart_boundary("multipart/mixed; boundary=\"batch_1\"").as_deref(),
            Some("batch_1")
        );
        assert_eq!(
            multipart_boundary("multipart/mixed;boundary=changeset_a").as_deref(),
            Some("changeset_a")
        );
        assert_eq!(multipart_boundary("application/json; boundary=x"), None);
        assert_eq!(multipart_boundary("multipart/mixed"), None);
    }

    #[test]
    fn test_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, "512".parse().unwrap());
        assert_eq!(content_length(&headers), Some(512));
    }
}
