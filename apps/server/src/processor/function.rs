//! Function and action processing
//!
//! Operations are declared in the model and backed by objects created through
//! an [`OperationRegistry`]. Functions take their parameters from the URI and
//! answer GET; actions take a JSON body and answer POST.

use crate::api::headers;
use crate::datasource::DataSourceProviderRegistry;
use crate::error::{Error, Result};
use crate::processor::{
    ProcessorResult, QueryProcessor, QueryResult, ResultItem, ValueIter, ValueStream,
};
use crate::request::{ODataRequest, ODataRequestContext};
use axum::http::{HeaderMap, Method, StatusCode};
use oxidata_edm::{
    parse_literal, Edm, Entity, ODataUri, OperationDef, OperationKind, Property, ResourcePath,
    TypeRef, UriKind, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What an operation produced.
pub enum OperationOutput {
    Value(Value),
    Entity(Entity),
    Entities(Vec<Entity>),
    /// Values produced lazily, for the streaming entry point.
    Stream(ValueIter),
}

impl OperationOutput {
    pub fn into_query_result(self) -> QueryResult {
        match self {
            OperationOutput::Value(value) => QueryResult::value(value),
            OperationOutput::Entity(entity) => QueryResult::entity(entity),
            OperationOutput::Entities(entities) => QueryResult::entities(entities),
            OperationOutput::Stream(iter) => {
                QueryResult::Single(ResultItem::Stream(ValueStream::new(iter)))
            }
        }
    }
}

impl fmt::Debug for OperationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutput::Value(value) => f.debug_tuple("Value").field(value).finish(),
            OperationOutput::Entity(entity) => f.debug_tuple("Entity").field(entity).finish(),
            OperationOutput::Entities(entities) => {
                f.debug_tuple("Entities").field(&entities.len()).finish()
            }
            OperationOutput::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Everything an operation may read while executing.
pub struct OperationContext<'a> {
    pub request: &'a ODataRequestContext,
    pub providers: &'a DataSourceProviderRegistry,
    /// Entity or collection the operation is bound to.
    pub binding: Option<QueryResult>,
}

impl OperationContext<'_> {
    pub fn binding_entity(&self) -> Option<&Entity> {
        match &self.binding {
            Some(QueryResult::Single(ResultItem::Entity(entity))) => Some(entity),
            _ => None,
        }
    }

    pub fn edm(&self) -> &Edm {
        &self.request.edm
    }
}

pub trait Operation: Send {
    fn set_parameter(&mut self, name: &str, value: Value) -> Result<()>;

    /// `Ok(None)` means the operation has no result (204).
    fn execute(&mut self, ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>>;

    /// Entry point for chunked requests; defaults to [`Operation::execute`].
    fn execute_streaming(&mut self, ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        self.execute(ctx)
    }
}

pub type OperationFactory = Arc<dyn Fn() -> Box<dyn Operation> + Send + Sync>;

/// Qualified operation name to constructor.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    factories: HashMap<String, OperationFactory>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, qualified_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Operation> + Send + Sync + 'static,
    {
        self.factories.insert(qualified_name.into(), Arc::new(factory));
    }

    pub fn instantiate(&self, qualified_name: &str) -> Option<Box<dyn Operation>> {
        self.factories.get(qualified_name).map(|factory| factory())
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.factories.contains_key(qualified_name)
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

pub struct FunctionProcessor<'a> {
    providers: &'a DataSourceProviderRegistry,
    registry: &'a OperationRegistry,
}

impl<'a> FunctionProcessor<'a> {
    pub fn new(providers: &'a DataSourceProviderRegistry, registry: &'a OperationRegistry) -> Self {
        Self {
            providers,
            registry,
        }
    }

    pub fn process(&self, ctx: &Arc<ODataRequestContext>) -> Result<ProcessorResult> {
        let edm = &ctx.edm;
        let path = ctx
            .uri()
            .resource_path()
            .ok_or_else(|| Error::processor("request does not address an operation"))?;
        let call = path
            .operation()
            .ok_or_else(|| Error::processor("request does not address an operation"))?;

        let definition = resolve(edm, path)?;
        check_method(ctx.method(), definition)?;

        let qualified_name = definition.qualified_name();
        let mut operation = self.registry.instantiate(&qualified_name).ok_or_else(|| {
            Error::NotImplemented(format!("no implementation registered for {qualified_name}"))
        })?;

        let arguments = match definition.kind {
            OperationKind::Function => function_arguments(edm, definition, &call.parameters)?,
            OperationKind::Action => action_arguments(edm, definition, &ctx.request.body)?,
        };
        for (name, value) in arguments {
            operation.set_parameter(&name, value)?;
        }

        let binding = if definition.is_bound {
            Some(self.binding(ctx, &path.parent())?)
        } else {
            None
        };
        let op_ctx = OperationContext {
            request: ctx,
            providers: self.providers,
            binding,
        };

        let streaming = headers::is_chunked(ctx.headers());
        tracing::debug!(operation = %qualified_name, kind = %definition.kind, streaming, "Invoking operation");
        let output = if streaming {
            operation.execute_streaming(&op_ctx)?
        } else {
            operation.execute(&op_ctx)?
        };

        let (status, result) = match output {
            Some(output) => (StatusCode::OK, output.into_query_result()),
            None => (StatusCode::NO_CONTENT, QueryResult::Nothing),
        };
        Ok(ProcessorResult::from_parts(
            status,
            result,
            HeaderMap::new(),
            Some(ctx.clone()),
        ))
    }

    /// Reads what the binding path addresses.
    fn binding(&self, ctx: &ODataRequestContext, path: &ResourcePath) -> Result<QueryResult> {
        let uri = ODataUri {
            service_root: ctx.service_root().to_string(),
            kind: UriKind::Resource(path.clone()),
            options: Default::default(),
        };
        let binding_ctx = ODataRequestContext::new(
            ODataRequest::new(Method::GET, uri).with_headers(ctx.headers().clone()),
            ctx.edm.clone(),
        );
        QueryProcessor::new(self.providers).execute(&binding_ctx)
    }
}

/// The declared operation a path's last segment calls.
fn resolve<'e>(edm: &'e Edm, path: &ResourcePath) -> Result<&'e OperationDef> {
    let call = path
        .operation()
        .ok_or_else(|| Error::processor("request does not address an operation"))?;
    let definition = if call.bound {
        let binding = path.parent().target_type(edm).ok_or_else(|| {
            Error::TargetType(format!("binding of {} could not be determined", call.name))
        })?;
        edm.bound_operation(call.kind, &call.name, &binding.type_ref())
    } else {
        edm.imported_operation(call.kind, &call.name)
            .or_else(|| edm.unbound_operation(call.kind, &call.name))
    };
    definition.ok_or_else(|| Error::bad_request_at(format!("unknown {} {}", call.kind, call.name), &call.name))
}

fn check_method(method: &Method, definition: &OperationDef) -> Result<()> {
    let expected = match definition.kind {
        OperationKind::Function => Method::GET,
        OperationKind::Action => Method::POST,
    };
    if *method != expected {
        return Err(Error::MethodNotAllowed(format!(
            "{} {} must be called with {expected}",
            definition.kind,
            definition.qualified_name()
        )));
    }
    Ok(())
}

fn declared<'d>(definition: &'d OperationDef, name: &str) -> Result<&'d Property> {
    definition
        .call_parameters()
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| {
            Error::bad_request_at(
                format!("{} has no parameter {name}", definition.qualified_name()),
                name,
            )
        })
}

/// Converts a URI parameter literal to its declared type.
fn bind_literal(edm: &Edm, type_ref: &TypeRef, name: &str, literal: &str) -> Result<Value> {
    if literal == "null" {
        return Ok(Value::Null);
    }
    let invalid = |e: &dyn fmt::Display| {
        Error::bad_request_at(format!("invalid value for parameter {name}: {e}"), name)
    };
    match type_ref.primitive() {
        Some(ty) if !type_ref.collection => {
            let value = parse_literal(literal)
                .map_err(|e| invalid(&e))?
                .coerce(ty)
                .map_err(|e| invalid(&e))?;
            Ok(Value::Primitive(value))
        }
        _ => {
            let json: serde_json::Value = serde_json::from_str(literal).map_err(|e| invalid(&e))?;
            oxidata_format::json::value_from_json(edm, type_ref, &json).map_err(|e| invalid(&e))
        }
    }
}

fn function_arguments(
    edm: &Edm,
    definition: &OperationDef,
    parameters: &[(String, String)],
) -> Result<Vec<(String, Value)>> {
    let mut arguments = Vec::with_capacity(parameters.len());
    for (name, literal) in parameters {
        let declaration = declared(definition, name)?;
        arguments.push((
            name.clone(),
            bind_literal(edm, &declaration.type_ref(), name, literal)?,
        ));
    }
    check_required(definition, &arguments)?;
    Ok(arguments)
}

fn action_arguments(edm: &Edm, definition: &OperationDef, body: &[u8]) -> Result<Vec<(String, Value)>> {
    let mut arguments = Vec::new();
    if !body.iter().all(u8::is_ascii_whitespace) {
        let json: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| Error::Unmarshaller(e.to_string()))?;
        let object = json
            .as_object()
            .ok_or_else(|| Error::Unmarshaller("action parameters must be a JSON object".to_string()))?;
        for (name, value) in object {
            if name.starts_with("@odata.") {
                continue;
            }
            let declaration = declared(definition, name)?;
            let value = oxidata_format::json::value_from_json(edm, &declaration.type_ref(), value)
                .map_err(|e| {
                    Error::bad_request_at(format!("invalid value for parameter {name}: {e}"), name)
                })?;
            arguments.push((name.clone(), value));
        }
    }
    check_required(definition, &arguments)?;
    Ok(arguments)
}

/// Reports every missing non-nullable parameter at once.
fn check_required(definition: &OperationDef, arguments: &[(String, Value)]) -> Result<()> {
    let missing: Vec<&str> = definition
        .call_parameters()
        .iter()
        .filter(|p| !p.nullable)
        .filter(|p| {
            !arguments
                .iter()
                .any(|(name, value)| *name == p.name && !value.is_null())
        })
        .map(|p| p.name.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::bad_request(format!(
            "missing required parameters: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use oxidata_edm::{parse_uri, PrimitiveValue};

    #[derive(Default)]
    struct Greet {
        name: Option<String>,
        title: Option<String>,
    }

    impl Operation for Greet {
        fn set_parameter(&mut self, name: &str, value: Value) -> Result<()> {
            let text = value.as_primitive().map(PrimitiveValue::to_text);
            match name {
                "name" => self.name = text,
                "title" => self.title = text,
                _ => {}
            }
            Ok(())
        }

        fn execute(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
            let name = self.name.clone().unwrap_or_default();
            let greeting = match &self.title {
                Some(title) => format!("Hello, {title} {name}"),
                None => format!("Hello, {name}"),
            };
            Ok(Some(OperationOutput::Value(Value::from(greeting))))
        }
    }

    struct Reset;

    impl Operation for Reset {
        fn set_parameter(&mut self, _name: &str, _value: Value) -> Result<()> {
            Ok(())
        }

        fn execute(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
            Ok(None)
        }
    }

    fn registry() -> OperationRegistry {
        let mut registry = OperationRegistry::new();
        registry.register("Demo.Greet", || Box::new(Greet::default()));
        registry.register("Demo.Reset", || Box::new(Reset));
        registry
    }

    fn run(method: Method, path: &str, query: Option<&str>) -> Result<ProcessorResult> {
        let edm = test_support::edm();
        let uri = parse_uri(&edm, "http://host/svc", path, query)?;
        let ctx = Arc::new(ODataRequestContext::new(ODataRequest::new(method, uri), edm));
        let providers = DataSourceProviderRegistry::new();
        let registry = registry();
        FunctionProcessor::new(&providers, &registry).process(&ctx)
    }

    #[test]
    fn test_function_binds_uri_parameters() {
        let result = run(Method::GET, "Greet(name='Ann',title='Dr.')", None).unwrap();
        assert_eq!(result.status(), StatusCode::OK);
        match result.query_result() {
            QueryResult::Single(ResultItem::Value(value)) => {
                assert_eq!(value, &Value::from("Hello, Dr. Ann"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parameter_alias_resolves_from_query() {
        let result = run(Method::GET, "Greet(name=@who)", Some("@who='Bob'")).unwrap();
        assert!(matches!(result.query_result(), QueryResult::Single(ResultItem::Value(_))));
    }

    #[test]
    fn test_missing_required_parameters_are_reported_together() {
        let err = run(Method::GET, "Greet(title='Dr.')", None).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let err = run(Method::GET, "Greet(name='Ann',mood='happy')", None).unwrap_err();
        assert_eq!(err.target(), Some("mood"));
    }

    #[test]
    fn test_function_requires_get() {
        let err = run(Method::POST, "Greet(name='Ann')", None).unwrap_err();
        assert!(matches!(err, Error::MethodNotAllowed(_)));
    }

    #[test]
    fn test_action_without_result_is_no_content() {
        let result = run(Method::POST, "Reset", None).unwrap();
        assert_eq!(result.status(), StatusCode::NO_CONTENT);
        assert!(matches!(result.query_result(), QueryResult::Nothing));
    }

    #[test]
    fn test_unregistered_operation_is_not_implemented() {
        let err = run(Method::GET, "Sequence(from=1,to=3)", None).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_check_required_lists_all_missing() {
        let edm = test_support::edm();
        let sequence = edm
            .imported_operation(OperationKind::Function, "Sequence")
            .unwrap();
        let err = check_required(sequence, &[]).unwrap_err();
        assert!(err.to_string().contains("from, to"));
    }
}
