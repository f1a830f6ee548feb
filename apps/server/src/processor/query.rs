//! GET processing
//!
//! Service root and `$metadata` answer with the model. Everything else goes
//! through the query model, the owning provider's strategy, and a final
//! reconciliation of the strategy's result shape with the URI's target type.

use crate::datasource::DataSourceProviderRegistry;
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryModelBuilder, QueryOperation, QueryResult, ResultItem};
use crate::request::ODataRequestContext;
use axum::http::StatusCode;
use oxidata_edm::{TargetKind, TargetType, UriKind, Value};
use std::sync::Arc;

pub struct QueryProcessor<'a> {
    providers: &'a DataSourceProviderRegistry,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(providers: &'a DataSourceProviderRegistry) -> Self {
        Self { providers }
    }

    pub fn query(&self, ctx: &Arc<ODataRequestContext>) -> Result<ProcessorResult> {
        let result = match &ctx.uri().kind {
            UriKind::ServiceRoot | UriKind::Metadata => {
                QueryResult::Single(ResultItem::Edm(ctx.edm.clone()))
            }
            UriKind::Batch => {
                return Err(Error::MethodNotAllowed(
                    "$batch only accepts POST".to_string(),
                ))
            }
            UriKind::Resource(_) | UriKind::Ref(_) => self.execute(ctx)?,
        };

        Ok(ProcessorResult::from_parts(
            StatusCode::OK,
            result,
            Default::default(),
            Some(ctx.clone()),
        ))
    }

    /// Runs the query for a resource path and reconciles the result with its target type.
    pub fn execute(&self, ctx: &ODataRequestContext) -> Result<QueryResult> {
        let target = ctx.uri().target_type(&ctx.edm).ok_or_else(|| {
            Error::TargetType(format!("{:?}", ctx.uri().resource_path()))
        })?;

        let operation = QueryModelBuilder::build(ctx)?;
        let entity_type = owning_entity_type(ctx, &operation, &target)?;

        let provider = self.providers.provider_for(ctx, &entity_type)?;
        let strategy = provider
            .strategy(ctx, &operation, &target)
            .ok_or_else(|| {
                Error::NotImplemented(format!("query {operation:?} is not supported"))
            })?;

        tracing::debug!(entity_type = %entity_type, target = %target.type_name, "Executing query strategy");
        let result = strategy.execute(ctx).into_result().map_err(|e| {
            if e.is_client_error() {
                tracing::debug!(error = %e, entity_type = %entity_type, "Query strategy rejected the request");
            } else {
                tracing::error!(error = %e, entity_type = %entity_type, "Query strategy failed");
            }
            e
        })?;
        reconcile(&target, result)
    }
}

/// Entity type whose provider answers the query: the target itself, or the
/// type of the entity set the path starts from for property, count and value paths.
fn owning_entity_type(
    ctx: &ODataRequestContext,
    operation: &QueryOperation,
    target: &TargetType,
) -> Result<String> {
    if target.kind == TargetKind::Entity {
        return Ok(target.type_name.clone());
    }
    operation
        .entity_set()
        .and_then(|name| ctx.edm.entity_set(name))
        .map(|set| set.entity_type.clone())
        .ok_or_else(|| Error::TargetType(format!("no entity set behind {}", target.type_name)))
}

/// Aligns a strategy result with the shape the URI asks for.
///
/// Collection targets need a collection. Single targets unwrap a one-element
/// collection, fail with not-found on an empty one and reject several.
pub fn reconcile(target: &TargetType, result: QueryResult) -> Result<QueryResult> {
    if target.collection {
        return match result {
            QueryResult::Collection { .. } | QueryResult::RawJson(_) => Ok(result),
            // A collection-valued property comes back as one collection value.
            QueryResult::Single(ResultItem::Value(Value::Collection(_)))
                if target.kind != TargetKind::Entity =>
            {
                Ok(result)
            }
            other => Err(Error::DataSource(format!(
                "expected a collection: {} answered with {:?}",
                target.type_name,
                other.kind()
            ))),
        };
    }

    match result {
        QueryResult::Collection { mut items, .. } => match items.len() {
            0 => Err(Error::EntityNotFound(format!(
                "no {} matches the request",
                target.type_name
            ))),
            1 => Ok(QueryResult::Single(items.remove(0))),
            n => Err(Error::DataSource(format!(
                "expected one result, found multiple ({n} {})",
                target.type_name
            ))),
        },
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ValueStream;
    use oxidata_edm::{Entity, PrimitiveType};

    fn customer(id: i64) -> Entity {
        Entity::new("Demo.Customer").with_property("Id", id)
    }

    #[test]
    fn test_single_target_unwraps_one_element() {
        let target = TargetType::entity("Demo.Customer", false);
        let result = reconcile(&target, QueryResult::entities(vec![customer(1)])).unwrap();
        assert!(matches!(result, QueryResult::Single(ResultItem::Entity(_))));
    }

    #[test]
    fn test_single_target_empty_is_not_found() {
        let target = TargetType::entity("Demo.Customer", false);
        let err = reconcile(&target, QueryResult::entities(vec![])).unwrap_err();
        assert!(matches!(err, Error::EntityNotFound(_)));
    }

    #[test]
    fn test_single_target_several_is_a_data_source_error() {
        let target = TargetType::entity("Demo.Customer", false);
        let err = reconcile(&target, QueryResult::entities(vec![customer(1), customer(2)]))
            .unwrap_err();
        assert!(matches!(err, Error::DataSource(_)));
    }

    #[test]
    fn test_collection_target_rejects_single() {
        let target = TargetType::entity("Demo.Customer", true);
        let err = reconcile(&target, QueryResult::entity(customer(1))).unwrap_err();
        assert!(matches!(err, Error::DataSource(_)));

        let ok = reconcile(&target, QueryResult::entities(vec![])).unwrap();
        assert!(matches!(ok, QueryResult::Collection { .. }));
    }

    #[test]
    fn test_collection_property_target_needs_a_collection_value() {
        let target = TargetType {
            collection: true,
            ..TargetType::primitive(PrimitiveType::String)
        };
        let scalar = reconcile(&target, QueryResult::value("a@example.org")).unwrap_err();
        assert!(matches!(scalar, Error::DataSource(ref m) if m.contains("expected a collection")));

        let values = Value::Collection(vec![Value::from("a@example.org")]);
        let ok = reconcile(&target, QueryResult::value(values)).unwrap();
        assert!(matches!(ok, QueryResult::Single(ResultItem::Value(Value::Collection(_)))));
    }

    #[test]
    fn test_collection_target_rejects_streams() {
        let target = TargetType::entity("Demo.Customer", true);
        let stream = ValueStream::new(Box::new(std::iter::empty()));
        let err = reconcile(&target, QueryResult::Single(ResultItem::Stream(stream))).unwrap_err();
        assert!(matches!(err, Error::DataSource(_)));
    }

    #[test]
    fn test_several_results_message() {
        let target = TargetType::entity("Demo.Customer", false);
        let err = reconcile(&target, QueryResult::entities(vec![customer(1), customer(2)]))
            .unwrap_err();
        assert!(err.to_string().contains("expected one result, found multiple"));
    }

    #[test]
    fn test_single_values_pass_through() {
        let target = TargetType::primitive(PrimitiveType::Int64);
        let result = reconcile(&target, QueryResult::value(3i64)).unwrap();
        assert!(matches!(result, QueryResult::Single(ResultItem::Value(_))));
    }
}
