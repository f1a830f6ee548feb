//! Payload validation shared by the write handlers.

use crate::datasource::named_key;
use crate::error::{Error, Result};
use crate::request::ODataRequestContext;
use oxidata_edm::{
    Entity, NavigationLink, PrimitiveValue, PropertyKind, StructuralAccessors, TypeDescriptor, Value,
};
use std::collections::BTreeMap;

/// URI key values of the addressed entity, named by the target type's key declaration.
fn uri_key(ctx: &ODataRequestContext, entity: &Entity) -> Result<Vec<(String, PrimitiveValue)>> {
    let Some(key) = ctx.uri().resource_path().and_then(|p| p.key()) else {
        return Ok(Vec::new());
    };
    let type_name = ctx
        .uri()
        .target_type(&ctx.edm)
        .map(|t| t.type_name)
        .unwrap_or_else(|| entity.type_name.clone());
    named_key(&ctx.edm, &type_name, key)
}

/// Payload key values must equal the URI's; numbers compare by value.
pub fn validate_keys(ctx: &ODataRequestContext, entity: &Entity) -> Result<()> {
    for (name, expected) in uri_key(ctx, entity)? {
        match entity.property(&name) {
            Some(Value::Primitive(actual)) if actual.key_equals(&expected) => {}
            Some(Value::Primitive(actual)) => {
                return Err(Error::processor_at(
                    format!(
                        "key {name} in the payload ({}) does not match the URI ({})",
                        actual.to_text(),
                        expected.to_text()
                    ),
                    name,
                ))
            }
            _ => {
                return Err(Error::processor_at(
                    format!("payload lacks key property {name}"),
                    name,
                ))
            }
        }
    }
    Ok(())
}

/// Copies URI key values into `entity` where the payload omits them.
pub fn adopt_uri_keys(ctx: &ODataRequestContext, entity: &mut Entity) -> Result<()> {
    for (name, value) in uri_key(ctx, entity)? {
        if entity.property(&name).is_none() {
            entity.set_property(name, value);
        }
    }
    Ok(())
}

/// Every non-nullable structural property is present and non-null, recursing
/// into complex values; non-nullable single-valued navigations are present.
pub fn validate_properties(accessors: &StructuralAccessors, entity: &Entity) -> Result<()> {
    let descriptor = accessors
        .get(&entity.type_name)
        .ok_or_else(|| Error::TargetType(format!("unknown entity type {}", entity.type_name)))?;
    check_structural(accessors, descriptor, &entity.properties)?;

    for nav in descriptor.navigation.iter().filter(|n| !n.collection && !n.nullable) {
        let present = matches!(entity.link(&nav.name), Some(NavigationLink::Single(Some(_))));
        if !present {
            return Err(Error::bad_request_at(
                format!(
                    "navigation property {} of {} is required",
                    nav.name, descriptor.qualified_name
                ),
                nav.name.clone(),
            ));
        }
    }
    Ok(())
}

fn check_structural(
    accessors: &StructuralAccessors,
    descriptor: &TypeDescriptor,
    properties: &BTreeMap<String, Value>,
) -> Result<()> {
    for property in &descriptor.properties {
        let value = properties.get(&property.name);
        if !property.nullable && value.map(Value::is_null).unwrap_or(true) {
            return Err(Error::bad_request_at(
                format!(
                    "property {} of {} must not be null",
                    property.name, descriptor.qualified_name
                ),
                property.name.clone(),
            ));
        }
        let PropertyKind::Complex(idx) = property.kind else {
            continue;
        };
        let nested = accessors.at(idx);
        match value {
            Some(Value::Complex(complex)) => check_structural(accessors, nested, &complex.properties)?,
            Some(Value::Collection(items)) => {
                for item in items {
                    if let Value::Complex(complex) = item {
                        check_structural(accessors, nested, &complex.properties)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}
