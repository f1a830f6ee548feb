//! OData JSON marshalling
//!
//! Entities are written with `@odata.id` and `@odata.type` control
//! information followed by their properties in declaration order and any
//! inlined navigation targets. Reading is driven by the declared types, so
//! numbers come back with the width the model declares.

use crate::error::{FormatError, Result};
use oxidata_edm::{
    format_key, ComplexValue, Edm, Entity, NavigationLink, PrimitiveType, PrimitiveValue,
    TypeDescriptor, TypeKind, TypeRef, Value,
};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value as JsonValue};

pub const ODATA_CONTEXT: &str = "@odata.context";
pub const ODATA_ID: &str = "@odata.id";
pub const ODATA_TYPE: &str = "@odata.type";
pub const ODATA_COUNT: &str = "@odata.count";

/// Canonical URL of `entity`: `{service_root}/{EntitySet}({key})`.
pub fn entity_id(edm: &Edm, entity: &Entity, service_root: &str) -> Option<String> {
    let set = edm.entity_set_for_type(&entity.type_name)?;
    let key = edm.accessors().extract_key(entity).ok()?;
    Some(format!(
        "{}/{}({})",
        service_root.trim_end_matches('/'),
        set.name,
        format_key(&key)
    ))
}

pub fn entity_to_json(edm: &Edm, entity: &Entity, service_root: &str) -> Result<Map<String, JsonValue>> {
    let descriptor = descriptor(edm, &entity.type_name)?;
    let mut object = Map::new();

    if let Some(id) = entity_id(edm, entity, service_root) {
        object.insert(ODATA_ID.to_string(), JsonValue::String(id));
    }
    object.insert(
        ODATA_TYPE.to_string(),
        JsonValue::String(format!("#{}", entity.type_name)),
    );

    write_properties(edm, descriptor, &entity.properties, &mut object)?;

    for nav in &descriptor.navigation {
        let Some(link) = entity.links.get(&nav.name) else {
            continue;
        };
        let value = match link {
            NavigationLink::Single(None) => JsonValue::Null,
            NavigationLink::Single(Some(target)) => {
                JsonValue::Object(entity_to_json(edm, target, service_root)?)
            }
            NavigationLink::Many(targets) => JsonValue::Array(
                targets
                    .iter()
                    .map(|t| entity_to_json(edm, t, service_root).map(JsonValue::Object))
                    .collect::<Result<_>>()?,
            ),
        };
        object.insert(nav.name.clone(), value);
    }

    Ok(object)
}

fn write_properties(
    edm: &Edm,
    descriptor: &TypeDescriptor,
    properties: &std::collections::BTreeMap<String, Value>,
    object: &mut Map<String, JsonValue>,
) -> Result<()> {
    for property in &descriptor.properties {
        if let Some(value) = properties.get(&property.name) {
            object.insert(property.name.clone(), value_to_json(edm, value)?);
        }
    }
    for name in properties.keys() {
        if descriptor.property(name).is_none() {
            return Err(FormatError::UnknownProperty {
                type_name: descriptor.qualified_name.clone(),
                property: name.clone(),
            });
        }
    }
    Ok(())
}

pub fn value_to_json(edm: &Edm, value: &Value) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Primitive(p) => primitive_to_json(p),
        Value::Complex(complex) => {
            let descriptor = descriptor(edm, &complex.type_name)?;
            let mut object = Map::new();
            write_properties(edm, descriptor, &complex.properties, &mut object)?;
            JsonValue::Object(object)
        }
        Value::Collection(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| value_to_json(edm, item))
                .collect::<Result<_>>()?,
        ),
    })
}

pub fn primitive_to_json(value: &PrimitiveValue) -> JsonValue {
    match value {
        PrimitiveValue::Boolean(v) => JsonValue::Bool(*v),
        PrimitiveValue::Byte(v) => JsonValue::from(*v),
        PrimitiveValue::SByte(v) => JsonValue::from(*v),
        PrimitiveValue::Int16(v) => JsonValue::from(*v),
        PrimitiveValue::Int32(v) => JsonValue::from(*v),
        PrimitiveValue::Int64(v) => JsonValue::from(*v),
        PrimitiveValue::Decimal(v) => decimal_to_json(v),
        PrimitiveValue::Double(v) => float_to_json(*v, value),
        PrimitiveValue::Single(v) => float_to_json(f64::from(*v), value),
        other => JsonValue::String(other.to_text()),
    }
}

fn decimal_to_json(value: &Decimal) -> JsonValue {
    match value.normalize().to_string().parse::<Number>() {
        Ok(number) => JsonValue::Number(number),
        Err(_) => JsonValue::String(value.to_string()),
    }
}

fn float_to_json(v: f64, original: &PrimitiveValue) -> JsonValue {
    Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(original.to_text()))
}

pub fn entity_from_str(edm: &Edm, type_name: &str, body: &str) -> Result<Entity> {
    let json: JsonValue = serde_json::from_str(body)?;
    entity_from_json(edm, type_name, &json)
}

/// Reads the `@odata.id` of an entity reference payload.
pub fn reference_from_str(body: &str) -> Result<String> {
    let json: JsonValue = serde_json::from_str(body)?;
    json.get(ODATA_ID)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| FormatError::UnexpectedShape {
            name: ODATA_ID.to_string(),
            expected: "a string".to_string(),
        })
}

/// Reads an entity of `type_name`. A payload `@odata.type` naming another entity type wins.
pub fn entity_from_json(edm: &Edm, type_name: &str, json: &JsonValue) -> Result<Entity> {
    let object = json.as_object().ok_or_else(|| FormatError::UnexpectedShape {
        name: type_name.to_string(),
        expected: "a JSON object".to_string(),
    })?;

    let type_name = object
        .get(ODATA_TYPE)
        .and_then(JsonValue::as_str)
        .map(|t| t.trim_start_matches('#'))
        .filter(|t| edm.type_kind(t) == Some(TypeKind::Entity))
        .unwrap_or(type_name);
    let descriptor = descriptor(edm, type_name)?;
    let mut entity = Entity::new(type_name);

    for (name, value) in object {
        if name.contains('@') {
            continue;
        }
        if let Some(nav) = descriptor.navigation(name) {
            let link = match value {
                JsonValue::Null if !nav.collection => NavigationLink::Single(None),
                JsonValue::Object(_) if !nav.collection => {
                    NavigationLink::Single(Some(Box::new(entity_from_json(edm, &nav.target, value)?)))
                }
                JsonValue::Array(items) if nav.collection => NavigationLink::Many(
                    items
                        .iter()
                        .map(|item| entity_from_json(edm, &nav.target, item))
                        .collect::<Result<_>>()?,
                ),
                _ => {
                    return Err(FormatError::UnexpectedShape {
                        name: name.clone(),
                        expected: if nav.collection { "an array" } else { "an object" }.to_string(),
                    })
                }
            };
            entity.links.insert(name.clone(), link);
            continue;
        }
        let property = descriptor
            .property(name)
            .ok_or_else(|| FormatError::UnknownProperty {
                type_name: type_name.to_string(),
                property: name.clone(),
            })?;
        entity
            .properties
            .insert(name.clone(), read_value(edm, name, &property.type_ref, value)?);
    }

    Ok(entity)
}

pub fn value_from_json(edm: &Edm, type_ref: &TypeRef, json: &JsonValue) -> Result<Value> {
    read_value(edm, &type_ref.name, type_ref, json)
}

fn read_value(edm: &Edm, name: &str, type_ref: &TypeRef, json: &JsonValue) -> Result<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    if type_ref.collection {
        let items = json.as_array().ok_or_else(|| FormatError::UnexpectedShape {
            name: name.to_string(),
            expected: "an array".to_string(),
        })?;
        let item_ref = TypeRef::single(type_ref.name.clone());
        return Ok(Value::Collection(
            items
                .iter()
                .map(|item| read_value(edm, name, &item_ref, item))
                .collect::<Result<_>>()?,
        ));
    }

    match edm.type_kind(&type_ref.name) {
        Some(TypeKind::Primitive(ty)) => Ok(Value::Primitive(primitive_from_json(name, ty, json)?)),
        Some(TypeKind::Complex) => {
            let object = json.as_object().ok_or_else(|| FormatError::UnexpectedShape {
                name: name.to_string(),
                expected: "a JSON object".to_string(),
            })?;
            let descriptor = descriptor(edm, &type_ref.name)?;
            let mut complex = ComplexValue::new(type_ref.name.clone());
            for (property_name, value) in object {
                if property_name.contains('@') {
                    continue;
                }
                let property = descriptor.property(property_name).ok_or_else(|| {
                    FormatError::UnknownProperty {
                        type_name: type_ref.name.clone(),
                        property: property_name.clone(),
                    }
                })?;
                complex.properties.insert(
                    property_name.clone(),
                    read_value(edm, property_name, &property.type_ref, value)?,
                );
            }
            Ok(Value::Complex(complex))
        }
        _ => Err(FormatError::UnknownType(type_ref.name.clone())),
    }
}

pub fn primitive_from_json(name: &str, ty: PrimitiveType, json: &JsonValue) -> Result<PrimitiveValue> {
    let text = match json {
        JsonValue::Bool(b) if ty == PrimitiveType::Boolean => b.to_string(),
        JsonValue::Number(n) if ty.is_numeric() => n.to_string(),
        JsonValue::String(s) if ty != PrimitiveType::Boolean => s.clone(),
        _ => {
            return Err(FormatError::UnexpectedShape {
                name: name.to_string(),
                expected: ty.name().to_string(),
            })
        }
    };
    Ok(PrimitiveValue::parse_text(ty, &text)?)
}

fn descriptor<'a>(edm: &'a Edm, type_name: &str) -> Result<&'a TypeDescriptor> {
    edm.accessors()
        .get(type_name)
        .ok_or_else(|| FormatError::UnknownType(type_name.to_string()))
}
