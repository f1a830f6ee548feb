use super::{log_failure, require_entity, validation, write_result, WriteMethodHandler};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult};
use crate::request::ODataRequestContext;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use oxidata_edm::Entity;
use std::sync::Arc;

/// POST to an entity set (or collection navigation): 201 with `Location`.
pub struct CreateHandler;

impl WriteMethodHandler for CreateHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult> {
        let entity = require_entity(entity, ctx.method())?;
        if !ctx.uri().is_entity_collection(&ctx.edm) {
            return Err(Error::bad_request("POST must address an entity collection"));
        }
        validation::validate_properties(ctx.edm.accessors(), entity)?;

        let created = data_source
            .create(ctx.uri(), entity, &ctx.edm)
            .map_err(log_failure("create"))?;

        let mut headers = HeaderMap::new();
        if let Some(location) = oxidata_format::json::entity_id(&ctx.edm, &created, ctx.service_root()) {
            let value = HeaderValue::from_str(&location)
                .map_err(|e| Error::Internal(format!("invalid Location {location}: {e}")))?;
            headers.insert(header::LOCATION, value);
        }
        tracing::debug!(entity_type = %created.type_name, "Entity created");
        Ok(write_result(ctx, StatusCode::CREATED, QueryResult::entity(created), headers))
    }
}
