use super::{log_failure, require_single, write_result, WriteMethodHandler};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult};
use crate::request::ODataRequestContext;
use axum::http::{HeaderMap, StatusCode};
use oxidata_edm::Entity;
use std::sync::Arc;

pub struct DeleteHandler;

impl WriteMethodHandler for DeleteHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult> {
        if entity.is_some() {
            return Err(Error::bad_request("DELETE must not carry an entity"));
        }
        require_single(ctx)?;
        data_source
            .delete(ctx.uri(), &ctx.edm)
            .map_err(log_failure("delete"))?;
        Ok(write_result(ctx, StatusCode::NO_CONTENT, QueryResult::Nothing, HeaderMap::new()))
    }
}
