//! Resource path and query option parsing.
//!
//! Covers the path shapes the processors dispatch on: entity sets, key
//! predicates, navigation and structural properties, `$count`, `$value`,
//! `$ref`, bound and unbound operation calls. Query options other than
//! `$top`, `$skip`, `$count`, `$format` and `$id` are kept as raw text.

use super::{KeyValue, ODataUri, OperationCall, PathSegment, QueryOptions, ResourcePath, UriKind};
use super::{TargetKind, TargetType};
use crate::error::UriError;
use crate::model::{Edm, OperationKind};
use crate::value::PrimitiveValue;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

type Result<T> = std::result::Result<T, UriError>;

/// Parses `path` (relative to the service root) and the raw query string.
pub fn parse_uri(edm: &Edm, service_root: &str, path: &str, query: Option<&str>) -> Result<ODataUri> {
    let service_root = service_root.trim_end_matches('/').to_string();
    let options = parse_query_options(query.unwrap_or(""))?;

    let raw_segments = split_outside_quotes(path.trim_matches('/'), '/');
    let segments: Vec<String> = raw_segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(&s)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| UriError::UnknownSegment(s.clone()))
        })
        .collect::<Result<_>>()?;

    let kind = match segments.as_slice() {
        [] => UriKind::ServiceRoot,
        [only] if only == "$metadata" => UriKind::Metadata,
        [only] if only == "$batch" => UriKind::Batch,
        _ => {
            let (path, is_ref) = parse_resource_path(edm, &segments, &options)?;
            if is_ref {
                UriKind::Ref(path)
            } else {
                UriKind::Resource(path)
            }
        }
    };

    Ok(ODataUri {
        service_root,
        kind,
        options,
    })
}

/// Resolves an `@odata.id` or `$id` value to a single-entity resource path.
pub fn parse_entity_reference(edm: &Edm, service_root: &str, reference: &str) -> Result<ResourcePath> {
    let root = service_root.trim_end_matches('/');
    let relative = match reference.strip_prefix(root) {
        Some(rest) => rest,
        None if reference.contains("://") => {
            return Err(UriError::OutsideServiceRoot(reference.to_string()))
        }
        None => reference,
    };

    let uri = parse_uri(edm, root, relative, None)?;
    match uri.kind {
        UriKind::Resource(path) if uri.is_single_entity(edm) => Ok(path),
        _ => Err(UriError::InvalidKey(reference.to_string())),
    }
}

fn parse_resource_path(
    edm: &Edm,
    segments: &[String],
    options: &QueryOptions,
) -> Result<(ResourcePath, bool)> {
    let mut parsed: Vec<PathSegment> = Vec::new();
    let mut current: Option<TargetType> = None;
    let mut is_ref = false;

    for (idx, raw) in segments.iter().enumerate() {
        let is_last = idx + 1 == segments.len();
        if is_ref {
            return Err(UriError::UnexpectedSegment(raw.clone()));
        }

        let (name, args) = split_predicate(raw)?;

        match name {
            "$ref" => {
                match &current {
                    Some(t) if t.kind == TargetKind::Entity && args.is_none() => {}
                    _ => return Err(UriError::UnexpectedSegment(raw.clone())),
                }
                is_ref = true;
                continue;
            }
            "$count" => {
                match &current {
                    Some(t) if t.collection && args.is_none() && is_last => {}
                    _ => return Err(UriError::UnexpectedSegment(raw.clone())),
                }
                parsed.push(PathSegment::Count);
                current = Some(TargetType::primitive(crate::model::PrimitiveType::Int64));
                continue;
            }
            "$value" => {
                match &current {
                    Some(t) if t.kind == TargetKind::Primitive && !t.collection && is_last => {}
                    _ => return Err(UriError::UnexpectedSegment(raw.clone())),
                }
                parsed.push(PathSegment::Value);
                continue;
            }
            "$metadata" | "$batch" => return Err(UriError::UnexpectedSegment(raw.clone())),
            _ => {}
        }

        match current.take() {
            None => {
                if let Some(set) = edm.entity_set(name) {
                    parsed.push(PathSegment::EntitySet(name.to_string()));
                    let mut target = TargetType::entity(&set.entity_type, true);
                    if let Some(args) = args {
                        parsed.push(PathSegment::Key(parse_key(edm, &target.type_name, args)?));
                        target.collection = false;
                    }
                    current = Some(target);
                } else if let Some(kind) = import_kind(edm, name) {
                    let call = OperationCall {
                        name: name.to_string(),
                        kind,
                        bound: false,
                        parameters: parse_parameters(args, options)?,
                    };
                    current = edm
                        .imported_operation(kind, name)
                        .and_then(|op| op.return_type_ref())
                        .and_then(|ret| TargetType::from_type_ref(edm, &ret));
                    parsed.push(PathSegment::Operation(call));
                    if current.is_none() && !is_last {
                        return Err(UriError::UnexpectedSegment(segments[idx + 1].clone()));
                    }
                } else {
                    return Err(UriError::UnknownSegment(raw.clone()));
                }
            }
            Some(t) if name.contains('.') => {
                let binding = t.type_ref();
                let (kind, operation) = [OperationKind::Function, OperationKind::Action]
                    .into_iter()
                    .find_map(|kind| edm.bound_operation(kind, name, &binding).map(|op| (kind, op)))
                    .ok_or_else(|| UriError::UnknownSegment(raw.clone()))?;
                parsed.push(PathSegment::Operation(OperationCall {
                    name: name.to_string(),
                    kind,
                    bound: true,
                    parameters: parse_parameters(args, options)?,
                }));
                current = operation
                    .return_type_ref()
                    .and_then(|ret| TargetType::from_type_ref(edm, &ret));
                if current.is_none() && !is_last {
                    return Err(UriError::UnexpectedSegment(segments[idx + 1].clone()));
                }
            }
            Some(t) if t.collection => {
                if t.kind == TargetKind::Entity {
                    if let Some(args) = args.filter(|_| name.is_empty()) {
                        parsed.push(PathSegment::Key(parse_key(edm, &t.type_name, args)?));
                        current = Some(TargetType { collection: false, ..t });
                        continue;
                    }
                }
                return Err(UriError::UnexpectedSegment(raw.clone()));
            }
            Some(t) => match t.kind {
                TargetKind::Entity => {
                    let entity_type = edm
                        .entity_type(&t.type_name)
                        .ok_or_else(|| UriError::UnknownSegment(raw.clone()))?;
                    if let Some(nav) = entity_type.navigation_property(name) {
                        let type_ref = nav.type_ref();
                        parsed.push(PathSegment::Navigation(name.to_string()));
                        let mut target = TargetType::entity(&type_ref.name, type_ref.collection);
                        if let Some(args) = args {
                            if !type_ref.collection {
                                return Err(UriError::InvalidKey(raw.clone()));
                            }
                            parsed.push(PathSegment::Key(parse_key(edm, &type_ref.name, args)?));
                            target.collection = false;
                        }
                        current = Some(target);
                    } else if let Some(property) = entity_type.property(name) {
                        if args.is_some() {
                            return Err(UriError::UnexpectedSegment(raw.clone()));
                        }
                        parsed.push(PathSegment::Property(name.to_string()));
                        current = TargetType::from_type_ref(edm, &property.type_ref());
                    } else {
                        return Err(UriError::UnknownSegment(raw.clone()));
                    }
                }
                TargetKind::Complex => {
                    let property = edm
                        .complex_type(&t.type_name)
                        .and_then(|ct| ct.property(name))
                        .ok_or_else(|| UriError::UnknownSegment(raw.clone()))?;
                    if args.is_some() {
                        return Err(UriError::UnexpectedSegment(raw.clone()));
                    }
                    parsed.push(PathSegment::Property(name.to_string()));
                    current = TargetType::from_type_ref(edm, &property.type_ref());
                }
                TargetKind::Primitive => return Err(UriError::UnexpectedSegment(raw.clone())),
            },
        }
    }

    Ok((ResourcePath::new(parsed), is_ref))
}

fn import_kind(edm: &Edm, name: &str) -> Option<OperationKind> {
    if edm.function_import(name).is_some() {
        Some(OperationKind::Function)
    } else if edm.action_import(name).is_some() {
        Some(OperationKind::Action)
    } else {
        None
    }
}

/// Splits `Name(args)` into its parts. A bare `(args)` yields an empty name.
fn split_predicate(segment: &str) -> Result<(&str, Option<&str>)> {
    match find_outside_quotes(segment, '(') {
        None => Ok((segment, None)),
        Some(open) => {
            let inner = segment[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| UriError::InvalidKey(segment.to_string()))?;
            Ok((&segment[..open], Some(inner)))
        }
    }
}

fn parse_key(edm: &Edm, type_name: &str, predicate: &str) -> Result<Vec<KeyValue>> {
    let entity_type = edm
        .entity_type(type_name)
        .ok_or_else(|| UriError::UnknownSegment(type_name.to_string()))?;
    let invalid = || UriError::InvalidKey(predicate.to_string());

    let parts = split_outside_quotes(predicate, ',');
    if parts.len() != entity_type.key.len() {
        return Err(invalid());
    }

    let mut values = Vec::with_capacity(parts.len());
    for (idx, part) in parts.iter().enumerate() {
        let (name, literal) = match find_outside_quotes(part, '=') {
            Some(eq) => (Some(part[..eq].trim().to_string()), &part[eq + 1..]),
            None if parts.len() == 1 => (None, part.as_str()),
            None => return Err(invalid()),
        };
        let key_name = name.as_deref().unwrap_or(&entity_type.key[idx]);
        if !entity_type.key.iter().any(|k| k == key_name) {
            return Err(invalid());
        }
        let declared = entity_type
            .property(key_name)
            .and_then(|p| p.type_ref().primitive())
            .ok_or_else(invalid)?;
        let value = parse_literal(literal.trim())?
            .coerce(declared)
            .map_err(|_| invalid())?;
        values.push(KeyValue { name, value });
    }
    Ok(values)
}

fn parse_parameters(args: Option<&str>, options: &QueryOptions) -> Result<Vec<(String, String)>> {
    let Some(args) = args.filter(|a| !a.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    split_outside_quotes(args, ',')
        .into_iter()
        .map(|pair| {
            let eq = find_outside_quotes(&pair, '=')
                .ok_or_else(|| UriError::InvalidParameters(args.to_string()))?;
            let name = pair[..eq].trim().to_string();
            let mut literal = pair[eq + 1..].trim().to_string();
            if literal.starts_with('@') {
                literal = options
                    .custom(&literal)
                    .ok_or_else(|| UriError::InvalidParameters(literal.clone()))?
                    .to_string();
            }
            Ok((name, literal))
        })
        .collect()
}

/// Parses a literal from its URI form. Integers parse as `Int64`; callers coerce to the declared type.
pub fn parse_literal(text: &str) -> Result<PrimitiveValue> {
    let invalid = || UriError::InvalidLiteral(text.to_string());

    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        if text.len() < 2 {
            return Err(invalid());
        }
        return Ok(PrimitiveValue::String(inner.replace("''", "'")));
    }
    if let Some(inner) = text
        .strip_prefix("binary'")
        .and_then(|t| t.strip_suffix('\''))
    {
        let bytes = URL_SAFE_NO_PAD
            .decode(inner)
            .or_else(|_| URL_SAFE.decode(inner))
            .or_else(|_| STANDARD.decode(inner))
            .map_err(|_| invalid())?;
        return Ok(PrimitiveValue::Binary(bytes));
    }
    match text {
        "true" => return Ok(PrimitiveValue::Boolean(true)),
        "false" => return Ok(PrimitiveValue::Boolean(false)),
        "INF" => return Ok(PrimitiveValue::Double(f64::INFINITY)),
        "-INF" => return Ok(PrimitiveValue::Double(f64::NEG_INFINITY)),
        "NaN" => return Ok(PrimitiveValue::Double(f64::NAN)),
        _ => {}
    }
    if let Ok(v) = text.parse::<i64>() {
        return Ok(PrimitiveValue::Int64(v));
    }
    if text.len() == 36 {
        if let Ok(guid) = Uuid::parse_str(text) {
            return Ok(PrimitiveValue::Guid(guid));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(PrimitiveValue::Date(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(PrimitiveValue::DateTimeOffset(dt));
    }
    let numeric = text.trim_end_matches(['m', 'M']);
    if let Ok(v) = Decimal::from_str(numeric) {
        return Ok(PrimitiveValue::Decimal(v));
    }
    if let Ok(v) = text.trim_end_matches(['d', 'D', 'f', 'F']).parse::<f64>() {
        return Ok(PrimitiveValue::Double(v));
    }
    Err(invalid())
}

fn parse_query_options(query: &str) -> Result<QueryOptions> {
    let mut options = QueryOptions::default();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = value.into_owned();
        let invalid = |value: &str| UriError::InvalidOption {
            name: name.to_string(),
            value: value.to_string(),
        };
        match name.as_ref() {
            "$filter" => options.filter = Some(value),
            "$orderby" => options.orderby = Some(value),
            "$expand" => options.expand = Some(value),
            "$select" => options.select = Some(value),
            "$search" => options.search = Some(value),
            "$format" => options.format = Some(value),
            "$id" => options.id = Some(value),
            "$top" => options.top = Some(value.parse().map_err(|_| invalid(&value))?),
            "$skip" => options.skip = Some(value.parse().map_err(|_| invalid(&value))?),
            "$count" => {
                options.count = match value.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(invalid(&value)),
                }
            }
            other if other.starts_with('$') => return Err(invalid(&value)),
            other => options.custom.push((other.to_string(), value)),
        }
    }
    Ok(options)
}

fn find_outside_quotes(text: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (idx, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            c if c == needle && !quoted => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_outside_quotes(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                current.push(c);
            }
            '(' if !quoted => {
                depth += 1;
                current.push(c);
            }
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == separator && !quoted && depth == 0 => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EdmBuilder;
    use crate::model::{EntitySet, EntityType, NavigationProperty, OperationDef, OperationImport, Property};

    const ROOT: &str = "http://localhost/odata";

    fn edm() -> Edm {
        EdmBuilder::new("Demo", "DemoService")
            .entity_type(
                EntityType::new("Customer", &["Id"])
                    .with_property(Property::new("Id", "Edm.Int64").required())
                    .with_property(Property::new("Name", "Edm.String").required())
                    .with_navigation(NavigationProperty::new("Orders", "Collection(Demo.Order)")),
            )
            .entity_type(
                EntityType::new("Order", &["Id"])
                    .with_property(Property::new("Id", "Edm.Int32").required())
                    .with_navigation(NavigationProperty::new("Customer", "Demo.Customer")),
            )
            .entity_set(EntitySet::new("Customers", "Demo.Customer"))
            .entity_set(EntitySet::new("Orders", "Demo.Order"))
            .operation(
                OperationDef::function("TopCustomers")
                    .with_parameter(Property::new("count", "Edm.Int32").required())
                    .returns("Collection(Demo.Customer)"),
            )
            .operation(
                OperationDef::function("OrderTotal")
                    .bound_to("Demo.Customer")
                    .returns("Edm.Decimal"),
            )
            .function_import(OperationImport::new("TopCustomers", "Demo.TopCustomers"))
            .build()
            .unwrap()
    }

    fn parse(path: &str, query: Option<&str>) -> Result<ODataUri> {
        parse_uri(&edm(), ROOT, path, query)
    }

    #[test]
    fn test_special_roots() {
        assert_eq!(parse("", None).unwrap().kind, UriKind::ServiceRoot);
        assert_eq!(parse("/", None).unwrap().kind, UriKind::ServiceRoot);
        assert_eq!(parse("$metadata", None).unwrap().kind, UriKind::Metadata);
        assert_eq!(parse("$batch", None).unwrap().kind, UriKind::Batch);
    }

    #[test]
    fn test_key_is_coerced_to_declared_type() {
        let uri = parse("Orders(7)", None).unwrap();
        let path = uri.resource_path().unwrap();
        assert_eq!(
            path.key().unwrap()[0].value,
            PrimitiveValue::Int32(7)
        );
        assert!(uri.is_single_entity(&edm()));
    }

    #[test]
    fn test_navigation_and_count() {
        let edm = edm();
        let uri = parse_uri(&edm, ROOT, "Customers(1)/Orders/$count", None).unwrap();
        let target = uri.target_type(&edm).unwrap();
        assert_eq!(target.type_name, "Edm.Int64");
        assert!(!target.collection);

        let uri = parse_uri(&edm, ROOT, "Customers(1)/Orders(3)", None).unwrap();
        assert_eq!(
            uri.resource_path().unwrap().entity_set(&edm).map(|s| s.name.as_str()),
            Some("Orders")
        );
    }

    #[test]
    fn test_ref_path() {
        let uri = parse("Customers(1)/Orders/$ref", None).unwrap();
        match uri.kind {
            UriKind::Ref(path) => assert_eq!(path.segments.len(), 3),
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(parse("Customers(1)/Name/$ref", None).is_err());
    }

    #[test]
    fn test_property_value() {
        let uri = parse("Customers(1)/Name/$value", None).unwrap();
        assert_eq!(
            uri.resource_path().unwrap().last(),
            Some(&PathSegment::Value)
        );
        assert!(parse("Customers/Name", None).is_err());
    }

    #[test]
    fn test_operation_calls() {
        let edm = edm();
        let uri = parse_uri(&edm, ROOT, "TopCustomers(count=@c)", Some("@c=3")).unwrap();
        let call = uri.operation().unwrap();
        assert!(!call.bound);
        assert_eq!(call.parameters, vec![("count".to_string(), "3".to_string())]);
        assert!(uri.target_type(&edm).unwrap().collection);

        let uri = parse_uri(&edm, ROOT, "Customers(1)/Demo.OrderTotal()", None).unwrap();
        let call = uri.operation().unwrap();
        assert!(call.bound);
        assert_eq!(call.kind, OperationKind::Function);
    }

    #[test]
    fn test_query_options() {
        let uri = parse("Customers", Some("$top=5&$skip=2&$count=true&$filter=Name%20eq%20'x'&foo=bar")).unwrap();
        assert_eq!(uri.options.top, Some(5));
        assert_eq!(uri.options.skip, Some(2));
        assert!(uri.options.count);
        assert_eq!(uri.options.filter.as_deref(), Some("Name eq 'x'"));
        assert_eq!(uri.options.custom("foo"), Some("bar"));

        assert!(matches!(
            parse("Customers", Some("$top=many")),
            Err(UriError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse_literal("'it''s'").unwrap(),
            PrimitiveValue::String("it's".into())
        );
        assert_eq!(parse_literal("42").unwrap(), PrimitiveValue::Int64(42));
        assert!(matches!(parse_literal("1.5").unwrap(), PrimitiveValue::Decimal(_)));
        assert!(matches!(
            parse_literal("2024-01-31").unwrap(),
            PrimitiveValue::Date(_)
        ));
        assert!(parse_literal("nonsense").is_err());
    }

    #[test]
    fn test_entity_reference() {
        let edm = edm();
        let path = parse_entity_reference(&edm, ROOT, "http://localhost/odata/Orders(2)").unwrap();
        assert_eq!(path.key().unwrap()[0].value, PrimitiveValue::Int32(2));

        let path = parse_entity_reference(&edm, ROOT, "Orders(3)").unwrap();
        assert_eq!(path.key().unwrap()[0].value, PrimitiveValue::Int32(3));

        assert!(parse_entity_reference(&edm, ROOT, "http://elsewhere/Orders(2)").is_err());
        assert!(parse_entity_reference(&edm, ROOT, "Orders").is_err());
    }
}
