//! JSON renderers (`application/json;odata.metadata=minimal`)

use super::scoring::{self, ERROR_EXTRA_SCORE, OPERATION_SCORE};
use super::{
    context_entity_set, format_error, is_entity_payload, is_raw_request, is_service_document,
    is_value_payload, ODataResponse, RenderContext, Renderer,
};
use crate::error::{Error, Result};
use crate::processor::{ProcessorResult, QueryResult, ResultItem};
use crate::request::ODataRequestContext;
use oxidata_edm::{Entity, Value};
use oxidata_format::json::{self as codec, ODATA_CONTEXT, ODATA_COUNT, ODATA_ID};
use serde_json::{json, Map, Value as JsonValue};

pub const JSON_MEDIA_TYPES: &[&str] = &["application/json"];
pub const JSON_CONTENT_TYPE: &str = "application/json;odata.metadata=minimal";

fn metadata_url(ctx: &ODataRequestContext) -> String {
    format!("{}/$metadata", ctx.service_root())
}

fn write_json(response: &mut ODataResponse, document: &JsonValue) -> Result<()> {
    let body = serde_json::to_vec(document)
        .map_err(|e| Error::Renderer(format!("JSON serialization failed: {e}")))?;
    response.set_content_type(JSON_CONTENT_TYPE)?;
    response.set_body(body);
    Ok(())
}

fn entities_of(items: &[ResultItem]) -> impl Iterator<Item = &Entity> {
    items.iter().filter_map(|item| match item {
        ResultItem::Entity(entity) => Some(entity),
        _ => None,
    })
}

/// Entities, entity collections and `$ref` results.
pub struct JsonEntityRenderer;

impl JsonEntityRenderer {
    fn render_refs(&self, ctx: &ODataRequestContext, result: &QueryResult) -> Result<JsonValue> {
        let root = ctx.service_root();
        let id_of = |entity: &Entity| {
            codec::entity_id(&ctx.edm, entity, root)
                .ok_or_else(|| Error::Renderer(format!("no canonical URL for {}", entity.type_name)))
        };
        match result {
            QueryResult::Single(ResultItem::Entity(entity)) => Ok(json!({
                ODATA_CONTEXT: format!("{}#$ref", metadata_url(ctx)),
                ODATA_ID: id_of(entity)?,
            })),
            QueryResult::Collection { items, .. } => {
                let refs = entities_of(items)
                    .map(|e| id_of(e).map(|id| json!({ ODATA_ID: id })))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!({
                    ODATA_CONTEXT: format!("{}#Collection($ref)", metadata_url(ctx)),
                    "value": refs,
                }))
            }
            _ => Err(Error::Renderer("unexpected $ref result".to_string())),
        }
    }
}

impl Renderer for JsonEntityRenderer {
    fn name(&self) -> &'static str {
        "json-entity"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if !is_entity_payload(ctx, result) {
            return 0;
        }
        scoring::media_score(ctx, JSON_MEDIA_TYPES)
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let request = ctx.request;
        let edm = &request.edm;
        let root = request.service_root();
        let query_result = result.query_result();

        if let QueryResult::RawJson(body) = query_result {
            response.set_content_type(JSON_CONTENT_TYPE)?;
            response.set_body(body.clone());
            return Ok(());
        }
        if request.uri().is_ref() {
            let document = self.render_refs(request, query_result)?;
            return write_json(response, &document);
        }

        let set = context_entity_set(request);
        let document = match query_result {
            QueryResult::Single(ResultItem::Entity(entity)) => {
                let mut object = Map::new();
                if let Some(set) = &set {
                    object.insert(
                        ODATA_CONTEXT.to_string(),
                        JsonValue::String(format!("{}#{set}/$entity", metadata_url(request))),
                    );
                }
                object.extend(codec::entity_to_json(edm, entity, root).map_err(format_error)?);
                JsonValue::Object(object)
            }
            QueryResult::Collection { items, count } => {
                let mut object = Map::new();
                if let Some(set) = &set {
                    object.insert(
                        ODATA_CONTEXT.to_string(),
                        JsonValue::String(format!("{}#{set}", metadata_url(request))),
                    );
                }
                if let Some(count) = count {
                    object.insert(ODATA_COUNT.to_string(), json!(count));
                }
                let value = entities_of(items)
                    .map(|e| codec::entity_to_json(edm, e, root).map(JsonValue::Object))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(format_error)?;
                object.insert("value".to_string(), JsonValue::Array(value));
                JsonValue::Object(object)
            }
            _ => return Err(Error::Renderer("unexpected entity result".to_string())),
        };
        write_json(response, &document)
    }
}

/// Context URL fragment naming the type of a value result.
pub(crate) fn value_type_name(ctx: &ODataRequestContext, value: Option<&Value>) -> Option<String> {
    if let Some(target) = ctx.uri().target_type(&ctx.edm) {
        return Some(if target.collection {
            format!("Collection({})", target.type_name)
        } else {
            target.type_name
        });
    }
    match value? {
        Value::Primitive(p) => Some(p.primitive_type().name().to_string()),
        Value::Complex(c) => Some(c.type_name.clone()),
        Value::Null | Value::Collection(_) => None,
    }
}

/// Collects a value result, draining a streamed one.
pub(crate) fn collect_values(result: &QueryResult) -> Result<Value> {
    let collect_item = |item: &ResultItem| -> Result<Value> {
        match item {
            ResultItem::Value(value) => Ok(value.clone()),
            ResultItem::Stream(stream) => {
                let iter = stream
                    .take()
                    .ok_or_else(|| Error::Renderer("value stream was already consumed".to_string()))?;
                Ok(Value::Collection(iter.collect::<Result<Vec<_>>>()?))
            }
            _ => Err(Error::Renderer("unexpected value result".to_string())),
        }
    };
    match result {
        QueryResult::Single(item) => collect_item(item),
        QueryResult::Collection { items, .. } => Ok(Value::Collection(
            items.iter().map(collect_item).collect::<Result<Vec<_>>>()?,
        )),
        _ => Err(Error::Renderer("unexpected value result".to_string())),
    }
}

/// Properties, complex values and operation results that are not entities.
pub struct JsonValueRenderer;

impl Renderer for JsonValueRenderer {
    fn name(&self) -> &'static str {
        "json-value"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if is_raw_request(ctx) || !is_value_payload(ctx, result) {
            return 0;
        }
        let score = scoring::media_score(ctx, JSON_MEDIA_TYPES);
        if ctx.uri().operation().is_some() {
            score.max(OPERATION_SCORE)
        } else {
            score
        }
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let request = ctx.request;
        let value = collect_values(result.query_result())?;
        let mut object = Map::new();
        if let Some(type_name) = value_type_name(request, Some(&value)) {
            object.insert(
                ODATA_CONTEXT.to_string(),
                JsonValue::String(format!("{}#{type_name}", metadata_url(request))),
            );
        }
        object.insert(
            "value".to_string(),
            codec::value_to_json(&request.edm, &value).map_err(format_error)?,
        );
        write_json(response, &JsonValue::Object(object))
    }
}

/// Service document listing entity sets and function imports.
pub struct JsonServiceDocumentRenderer;

impl Renderer for JsonServiceDocumentRenderer {
    fn name(&self) -> &'static str {
        "json-service-document"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        if !is_service_document(ctx, result) {
            return 0;
        }
        scoring::media_score(ctx, JSON_MEDIA_TYPES)
    }

    fn render(
        &self,
        ctx: &RenderContext<'_>,
        _result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let container = ctx.request.edm.container();
        let sets = container.entity_sets.iter().map(|set| {
            json!({ "name": set.name, "kind": "EntitySet", "url": set.name })
        });
        let functions = container.function_imports.iter().map(|import| {
            json!({ "name": import.name, "kind": "FunctionImport", "url": import.name })
        });
        let document = json!({
            ODATA_CONTEXT: metadata_url(ctx.request),
            "value": sets.chain(functions).collect::<Vec<_>>(),
        });
        write_json(response, &document)
    }
}

/// `{"error": {"code", "message", "target"}}`
pub struct JsonErrorRenderer;

pub(crate) fn error_document(error: &Error) -> JsonValue {
    let mut body = json!({
        "code": error.code(),
        "message": error.to_string(),
    });
    if let Some(target) = error.target() {
        body["target"] = json!(target);
    }
    json!({ "error": body })
}

impl Renderer for JsonErrorRenderer {
    fn name(&self) -> &'static str {
        "json-error"
    }

    fn score(&self, ctx: &ODataRequestContext, result: &QueryResult) -> i32 {
        match result {
            QueryResult::Exception(_) => scoring::media_score(ctx, JSON_MEDIA_TYPES) + ERROR_EXTRA_SCORE,
            _ => 0,
        }
    }

    fn render(
        &self,
        _ctx: &RenderContext<'_>,
        result: &ProcessorResult,
        response: &mut ODataResponse,
    ) -> Result<()> {
        let error = result
            .query_result()
            .as_exception()
            .ok_or_else(|| Error::Renderer("error renderer needs an exception".to_string()))?;
        write_json(response, &error_document(error))
    }
}
