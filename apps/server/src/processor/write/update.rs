use super::{log_failure, require_entity, require_single, validation, write_result, WriteMethodHandler};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::processor::{ProcessorResult, QueryResult};
use crate::request::ODataRequestContext;
use axum::http::{HeaderMap, StatusCode};
use oxidata_edm::Entity;
use std::sync::Arc;

/// PUT on a single entity: full replacement.
pub struct UpdateHandler;

impl WriteMethodHandler for UpdateHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult> {
        let entity = require_entity(entity, ctx.method())?;
        require_single(ctx)?;
        validation::validate_keys(ctx, entity)?;
        validation::validate_properties(ctx.edm.accessors(), entity)?;

        let updated = data_source
            .update(ctx.uri(), entity, &ctx.edm)
            .map_err(log_failure("update"))?;
        Ok(write_result(ctx, StatusCode::OK, QueryResult::entity(updated), HeaderMap::new()))
    }
}
