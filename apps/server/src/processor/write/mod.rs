//! Write processing
//!
//! A handler is selected from the verb and the shape of the URI, the entity
//! read from the body is validated against the model, and the owning
//! provider's data source applies the change.
//!
//! | verb   | `$ref` URI    | resource URI |
//! |--------|---------------|--------------|
//! | POST   | link create   | create       |
//! | PUT    | link create   | update       |
//! | PATCH  | -             | patch        |
//! | DELETE | link delete   | delete       |
//!
//! Action calls never reach this table; they are routed to the function
//! processor before body reading.

pub mod batch;
mod create;
mod delete;
mod link;
mod patch;
mod update;
pub mod validation;

use crate::api::headers;
use crate::datasource::{DataSource, DataSourceProviderRegistry};
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult};
use crate::request::ODataRequestContext;
use axum::http::{HeaderMap, Method, StatusCode};
use oxidata_edm::{Entity, ODataUri, TargetKind};
use std::sync::Arc;

pub use batch::{BatchFailure, BatchMethodHandler, ChangeSetEntity};
pub use create::CreateHandler;
pub use delete::DeleteHandler;
pub use link::{LinkCreateHandler, LinkDeleteHandler};
pub use patch::PatchHandler;
pub use update::UpdateHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Patch,
    Delete,
    LinkCreate,
    LinkDelete,
}

/// Handler for `method` on `uri`; `None` means the verb is not supported there.
pub fn select_handler(method: &Method, uri: &ODataUri) -> Option<WriteKind> {
    uri.resource_path()?;
    if uri.operation().is_some() {
        return None;
    }
    let is_ref = uri.is_ref();
    match *method {
        Method::POST if is_ref => Some(WriteKind::LinkCreate),
        Method::POST => Some(WriteKind::Create),
        Method::PUT if is_ref => Some(WriteKind::LinkCreate),
        Method::PUT => Some(WriteKind::Update),
        Method::PATCH if !is_ref => Some(WriteKind::Patch),
        Method::DELETE if is_ref => Some(WriteKind::LinkDelete),
        Method::DELETE => Some(WriteKind::Delete),
        _ => None,
    }
}

pub trait WriteMethodHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult>;
}

impl WriteKind {
    pub fn handler(self) -> &'static dyn WriteMethodHandler {
        match self {
            WriteKind::Create => &CreateHandler,
            WriteKind::Update => &UpdateHandler,
            WriteKind::Patch => &PatchHandler,
            WriteKind::Delete => &DeleteHandler,
            WriteKind::LinkCreate => &LinkCreateHandler,
            WriteKind::LinkDelete => &LinkDeleteHandler,
        }
    }
}

pub struct WriteProcessor<'a> {
    providers: &'a DataSourceProviderRegistry,
}

impl<'a> WriteProcessor<'a> {
    pub fn new(providers: &'a DataSourceProviderRegistry) -> Self {
        Self { providers }
    }

    pub fn write(
        &self,
        ctx: &Arc<ODataRequestContext>,
        entity: Option<&Entity>,
    ) -> Result<ProcessorResult> {
        let kind = select_handler(ctx.method(), ctx.uri()).ok_or_else(|| {
            Error::MethodNotAllowed(format!("{} is not supported on this resource", ctx.method()))
        })?;
        let data_source = self.data_source_for(ctx)?;
        tracing::debug!(method = %ctx.method(), handler = ?kind, "Dispatching write");
        kind.handler().apply(ctx, entity, data_source.as_ref())
    }

    /// Data source of the entity type the write addresses.
    pub fn data_source_for(&self, ctx: &ODataRequestContext) -> Result<Arc<dyn DataSource>> {
        let entity_type = written_entity_type(ctx)?;
        self.providers.data_source_for(ctx, &entity_type)
    }
}

/// Entity type a write lands on; for `$ref` writes, the type owning the link.
pub(crate) fn written_entity_type(ctx: &ODataRequestContext) -> Result<String> {
    let uri = ctx.uri();
    let path = uri
        .resource_path()
        .ok_or_else(|| Error::bad_request("write requests must address a resource"))?;
    let path = if uri.is_ref() { link::source_path(path) } else { path.clone() };
    path.target_type(&ctx.edm)
        .filter(|t| t.kind == TargetKind::Entity)
        .map(|t| t.type_name)
        .ok_or_else(|| Error::TargetType(format!("{path:?} does not address entities")))
}

/// Builds the handler result, honouring `Prefer: return=minimal`.
pub(crate) fn write_result(
    ctx: &Arc<ODataRequestContext>,
    status: StatusCode,
    result: QueryResult,
    mut response_headers: HeaderMap,
) -> ProcessorResult {
    let result = if matches!(result, QueryResult::Nothing) {
        result
    } else if headers::prefer_minimal(ctx.headers()) {
        headers::preference_applied_minimal(&mut response_headers);
        QueryResult::Nothing
    } else {
        result
    };
    ProcessorResult::from_parts(status, result, response_headers, Some(ctx.clone()))
}

/// Logs a data source failure at error level and passes it on.
pub(crate) fn log_failure(operation: &'static str) -> impl Fn(Error) -> Error {
    move |e| {
        tracing::error!(operation, error = %e, "Data source write failed");
        e
    }
}

pub(crate) fn require_entity<'e>(entity: Option<&'e Entity>, method: &Method) -> Result<&'e Entity> {
    entity.ok_or_else(|| Error::bad_request(format!("{method} requires an entity in the request body")))
}

pub(crate) fn require_single(ctx: &ODataRequestContext) -> Result<()> {
    if ctx.uri().is_single_entity(&ctx.edm) {
        Ok(())
    } else {
        Err(Error::bad_request(format!(
            "{} must address a single entity",
            ctx.method()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use oxidata_edm::parse_uri;

    fn kind(method: Method, path: &str) -> Option<WriteKind> {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, None).unwrap();
        select_handler(&method, &uri)
    }

    #[test]
    fn test_handler_selection() {
        assert_eq!(kind(Method::POST, "Customers"), Some(WriteKind::Create));
        assert_eq!(kind(Method::POST, "Customers(1)/Orders/$ref"), Some(WriteKind::LinkCreate));
        assert_eq!(kind(Method::PUT, "Orders(10)/Customer/$ref"), Some(WriteKind::LinkCreate));
        assert_eq!(kind(Method::PUT, "Customers(1)"), Some(WriteKind::Update));
        assert_eq!(kind(Method::PATCH, "Customers(1)"), Some(WriteKind::Patch));
        assert_eq!(kind(Method::DELETE, "Customers(1)"), Some(WriteKind::Delete));
        assert_eq!(kind(Method::DELETE, "Customers(1)/Orders(10)/$ref"), Some(WriteKind::LinkDelete));
    }

    #[test]
    fn test_unsupported_verbs_select_nothing() {
        assert_eq!(kind(Method::PATCH, "Customers(1)/Orders/$ref"), None);
        assert_eq!(kind(Method::OPTIONS, "Customers"), None);
        assert_eq!(kind(Method::POST, "$metadata"), None);
        assert_eq!(kind(Method::POST, "Reset"), None);
    }
}
