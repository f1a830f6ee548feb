//! Request body reading for write requests.

use crate::api::headers;
use crate::error::{Error, Result};
use crate::request::ODataRequestContext;
use oxidata_edm::{parse_entity_reference, Entity, ResourcePath, TargetKind};
use oxidata_format::{atom, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Atom,
}

impl BodyFormat {
    /// Atom for XML content types, JSON otherwise.
    pub fn of(ctx: &ODataRequestContext) -> Self {
        match headers::content_type(ctx.headers()).map(headers::essence).as_deref() {
            Some("application/atom+xml" | "application/xml" | "text/xml") => BodyFormat::Atom,
            _ => BodyFormat::Json,
        }
    }
}

fn body_text(ctx: &ODataRequestContext) -> Result<Option<&str>> {
    let text = std::str::from_utf8(&ctx.request.body)
        .map_err(|e| Error::Unmarshaller(format!("body is not UTF-8: {e}")))?;
    Ok((!text.trim().is_empty()).then_some(text))
}

/// Entity carried by the body, typed by the URI's target.
///
/// `$ref` and operation requests carry no entity; their bodies are read elsewhere.
pub fn read_entity(ctx: &ODataRequestContext) -> Result<Option<Entity>> {
    let uri = ctx.uri();
    if uri.is_ref() || uri.operation().is_some() {
        return Ok(None);
    }
    let Some(text) = body_text(ctx)? else {
        return Ok(None);
    };

    let target = uri
        .target_type(&ctx.edm)
        .filter(|t| t.kind == TargetKind::Entity)
        .ok_or_else(|| Error::Unmarshaller("request body must address an entity".to_string()))?;

    let entity = match BodyFormat::of(ctx) {
        BodyFormat::Json => json::entity_from_str(&ctx.edm, &target.type_name, text),
        BodyFormat::Atom => atom::read_entry(&ctx.edm, text, Some(&target.type_name)),
    }
    .map_err(|e| Error::Unmarshaller(e.to_string()))?;

    tracing::debug!(entity_type = %entity.type_name, "Read request entity");
    Ok(Some(entity))
}

/// Path of the entity an `@odata.id` (or `<metadata:ref id>`) body points at.
pub fn read_reference(ctx: &ODataRequestContext) -> Result<Option<ResourcePath>> {
    let Some(text) = body_text(ctx)? else {
        return Ok(None);
    };
    let id = match BodyFormat::of(ctx) {
        BodyFormat::Json => json::reference_from_str(text),
        BodyFormat::Atom => atom::read_reference(text),
    }
    .map_err(|e| Error::Unmarshaller(e.to_string()))?;
    Ok(Some(parse_entity_reference(&ctx.edm, ctx.service_root(), &id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ODataRequest;
    use crate::test_support;
    use axum::http::{header, HeaderMap, HeaderValue, Method};
    use oxidata_edm::{parse_uri, Value};

    fn context(method: Method, path: &str, content_type: &str, body: &str) -> ODataRequestContext {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, None).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        ODataRequestContext::new(
            ODataRequest::new(method, uri)
                .with_headers(headers)
                .with_body(body.to_string()),
            edm,
        )
    }

    #[test]
    fn test_json_entity_is_typed_by_target() {
        let ctx = context(
            Method::POST,
            "Customers",
            "application/json",
            r#"{"Id": 7, "Name": "Eve"}"#,
        );
        let entity = read_entity(&ctx).unwrap().unwrap();
        assert_eq!(entity.type_name, "Demo.Customer");
        assert_eq!(entity.property("Id"), Some(&Value::from(7i64)));
    }

    #[test]
    fn test_empty_body_reads_nothing() {
        let ctx = context(Method::DELETE, "Customers(1)", "application/json", "  ");
        assert!(read_entity(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_malformed_body_is_unmarshaller_error() {
        let ctx = context(Method::POST, "Customers", "application/json", "{not json");
        assert!(matches!(read_entity(&ctx), Err(Error::Unmarshaller(_))));
    }

    #[test]
    fn test_reference_body_resolves_to_path() {
        let ctx = context(
            Method::POST,
            "Customers(1)/Orders/$ref",
            "application/json",
            r#"{"@odata.id": "http://host/svc/Orders(20)"}"#,
        );
        assert!(read_entity(&ctx).unwrap().is_none());
        let path = read_reference(&ctx).unwrap().unwrap();
        assert!(path.key().is_some());
    }

    #[test]
    fn test_xml_content_type_selects_atom() {
        let ctx = context(Method::POST, "Customers", "application/atom+xml;type=entry", "<x/>");
        assert_eq!(BodyFormat::of(&ctx), BodyFormat::Atom);
    }
}
