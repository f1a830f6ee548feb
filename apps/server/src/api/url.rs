//! URL helpers for building absolute service roots.

use axum::http::HeaderMap;

/// Build the service root (`{scheme}://{host}{service_path}`) using forwarding headers when present.
///
/// Entity ids, `Location` headers and context URLs are absolute, so they must
/// reflect the address the client used when running behind reverse proxies.
pub fn service_root_from_headers(headers: &HeaderMap, service_path: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .or_else(|| headers.get("x-forwarded-scheme"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    format!("{}://{}{}", scheme, host, service_path.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_headers_win() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "internal:8080".parse().unwrap());
        assert_eq!(
            service_root_from_headers(&headers, "/odata"),
            "http://internal:8080/odata"
        );

        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        headers.insert("x-forwarded-host", "api.example.com".parse().unwrap());
        assert_eq!(
            service_root_from_headers(&headers, "/odata"),
            "https://api.example.com/odata"
        );
    }
}
