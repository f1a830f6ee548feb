//! `$ref` writes: linking and unlinking existing entities.
//!
//! The link target comes from a key in the path (`Customers(1)/Orders(10)/$ref`),
//! the `$id` query option, or an entity reference in the body, in that order.

use super::{log_failure, write_result, WriteMethodHandler};
use crate::datasource::{DataSource, ODataLink};
use crate::error::{Error, Result};
use crate::processor::{unmarshal, ProcessorResult, QueryResult};
use crate::request::ODataRequestContext;
use axum::http::{HeaderMap, StatusCode};
use oxidata_edm::{parse_entity_reference, Entity, PathSegment, ResourcePath};
use std::sync::Arc;

/// Path of the entity owning the link: the `$ref` path without its
/// navigation segment and any trailing key.
pub(crate) fn source_path(path: &ResourcePath) -> ResourcePath {
    let mut segments = path.segments.clone();
    if matches!(segments.last(), Some(PathSegment::Key(_))) {
        segments.pop();
    }
    if matches!(segments.last(), Some(PathSegment::Navigation(_))) {
        segments.pop();
    }
    ResourcePath::new(segments)
}

fn navigation_property(path: &ResourcePath) -> Result<String> {
    path.segments
        .iter()
        .rev()
        .find_map(|segment| match segment {
            PathSegment::Navigation(name) => Some(name.clone()),
            _ => None,
        })
        .ok_or_else(|| Error::bad_request("$ref must follow a navigation property"))
}

/// Canonical path of the entity a trailing key in the `$ref` path names.
fn path_target(ctx: &ODataRequestContext, path: &ResourcePath) -> Result<Option<ResourcePath>> {
    let Some(PathSegment::Key(key)) = path.last() else {
        return Ok(None);
    };
    let target = path
        .target_type(&ctx.edm)
        .ok_or_else(|| Error::TargetType(format!("{path:?} has no target type")))?;
    let set = ctx.edm.entity_set_for_type(&target.type_name).ok_or_else(|| {
        Error::TargetType(format!("no entity set holds {}", target.type_name))
    })?;
    Ok(Some(ResourcePath::new(vec![
        PathSegment::EntitySet(set.name.clone()),
        PathSegment::Key(key.clone()),
    ])))
}

fn link_of(ctx: &ODataRequestContext, read_body: bool) -> Result<ODataLink> {
    let uri = ctx.uri();
    let path = match uri.resource_path() {
        Some(path) if uri.is_ref() => path,
        _ => return Err(Error::bad_request("link writes must address a $ref")),
    };

    let mut target = path_target(ctx, path)?;
    if target.is_none() {
        if let Some(id) = &uri.options.id {
            target = Some(parse_entity_reference(&ctx.edm, ctx.service_root(), id)?);
        }
    }
    if target.is_none() && read_body {
        target = unmarshal::read_reference(ctx)?;
    }

    Ok(ODataLink {
        source: source_path(path),
        property: navigation_property(path)?,
        target,
    })
}

pub struct LinkCreateHandler;

impl WriteMethodHandler for LinkCreateHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        _entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult> {
        let link = link_of(ctx, true)?;
        if link.target.is_none() {
            return Err(Error::bad_request("link target is missing"));
        }
        data_source
            .create_link(ctx.uri(), &link, &ctx.edm)
            .map_err(log_failure("create_link"))?;
        Ok(write_result(ctx, StatusCode::NO_CONTENT, QueryResult::Nothing, HeaderMap::new()))
    }
}

pub struct LinkDeleteHandler;

impl WriteMethodHandler for LinkDeleteHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        _entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult> {
        let link = link_of(ctx, false)?;
        data_source
            .delete_link(ctx.uri(), &link, &ctx.edm)
            .map_err(log_failure("delete_link"))?;
        Ok(write_result(ctx, StatusCode::NO_CONTENT, QueryResult::Nothing, HeaderMap::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ODataRequest;
    use crate::test_support;
    use axum::http::Method;
    use oxidata_edm::parse_uri;

    fn link(method: Method, path: &str, query: Option<&str>, body: &str) -> Result<ODataLink> {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, query)?;
        let ctx = ODataRequestContext::new(
            ODataRequest::new(method, uri).with_body(body.to_string()),
            edm,
        );
        link_of(&ctx, true)
    }

    #[test]
    fn test_target_from_path_key() {
        let link = link(Method::DELETE, "Customers(1)/Orders(10)/$ref", None, "").unwrap();
        assert_eq!(link.property, "Orders");
        assert_eq!(link.source.segments.len(), 2);
        let target = link.target.unwrap();
        assert_eq!(target.segments[0], PathSegment::EntitySet("Orders".to_string()));
    }

    #[test]
    fn test_target_from_id_option() {
        let link = link(
            Method::DELETE,
            "Customers(1)/Orders/$ref",
            Some("$id=http://host/svc/Orders(10)"),
            "",
        )
        .unwrap();
        assert!(link.target.is_some());
    }

    #[test]
    fn test_target_from_body() {
        let link = link(
            Method::POST,
            "Customers(1)/Orders/$ref",
            None,
            r#"{"@odata.id":"Orders(11)"}"#,
        )
        .unwrap();
        assert!(link.target.is_some());
    }

    #[test]
    fn test_single_valued_delete_needs_no_target() {
        let link = link(Method::DELETE, "Orders(10)/Customer/$ref", None, "").unwrap();
        assert_eq!(link.property, "Customer");
        assert!(link.target.is_none());
    }
}
