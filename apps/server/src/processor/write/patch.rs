use super::{log_failure, require_entity, require_single, validation, write_result, WriteMethodHandler};
use crate::datasource::{DataSource, PatchInfo};
use crate::error::Result;
use crate::processor::{ProcessorResult, QueryResult};
use crate::request::ODataRequestContext;
use axum::http::{HeaderMap, StatusCode};
use oxidata_edm::Entity;
use std::sync::Arc;

/// PATCH on a single entity.
///
/// Only the properties present in the payload change. Without native patch
/// support the payload is handed to a full update.
pub struct PatchHandler;

impl WriteMethodHandler for PatchHandler {
    fn apply(
        &self,
        ctx: &Arc<ODataRequestContext>,
        entity: Option<&Entity>,
        data_source: &dyn DataSource,
    ) -> Result<ProcessorResult> {
        let mut entity = require_entity(entity, ctx.method())?.clone();
        require_single(ctx)?;
        validation::adopt_uri_keys(ctx, &mut entity)?;
        validation::validate_keys(ctx, &entity)?;

        let patch = PatchInfo::from_entity(entity);
        let patched = match data_source.patch_support() {
            Some(native) => native.patch(ctx.uri(), &patch, &ctx.edm),
            None => {
                tracing::debug!("No native patch support, applying as full update");
                if let Err(missing) = validation::validate_properties(ctx.edm.accessors(), &patch.entity) {
                    tracing::warn!(
                        entity_type = %patch.entity.type_name,
                        error = %missing,
                        "PATCH applied as full update leaves required properties unset"
                    );
                }
                data_source.update(ctx.uri(), &patch.entity, &ctx.edm)
            }
        }
        .map_err(log_failure("patch"))?;
        Ok(write_result(ctx, StatusCode::OK, QueryResult::entity(patched), HeaderMap::new()))
    }
}
