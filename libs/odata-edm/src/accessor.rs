//! Structural accessors
//!
//! Per-type descriptors built once from the model. Key extraction, required
//! property validation and parameter binding read these instead of walking
//! the declarations on every request.

use crate::error::{EdmError, Result};
use crate::model::{ComplexType, EntityType, PrimitiveType, TypeRef};
use crate::value::{Entity, PrimitiveValue, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Primitive(PrimitiveType),
    /// Index of the complex type's descriptor in the arena.
    Complex(usize),
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub type_ref: TypeRef,
    pub nullable: bool,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone)]
pub struct NavigationDescriptor {
    pub name: String,
    pub target: String,
    pub collection: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub qualified_name: String,
    pub is_entity: bool,
    pub key: Vec<String>,
    pub properties: Vec<PropertyDescriptor>,
    pub navigation: Vec<NavigationDescriptor>,
}

impl TypeDescriptor {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationDescriptor> {
        self.navigation.iter().find(|n| n.name == name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|k| k == name)
    }

    /// Key values of `entity` in key declaration order.
    pub fn extract_key(&self, entity: &Entity) -> Result<Vec<(String, PrimitiveValue)>> {
        self.key
            .iter()
            .map(|name| match entity.property(name) {
                Some(Value::Primitive(value)) => Ok((name.clone(), value.clone())),
                _ => Err(EdmError::MissingKey {
                    type_name: self.qualified_name.clone(),
                    property: name.clone(),
                }),
            })
            .collect()
    }
}

/// Arena of descriptors for every entity and complex type in a model.
#[derive(Debug, Default)]
pub struct StructuralAccessors {
    descriptors: Vec<TypeDescriptor>,
    index: HashMap<String, usize>,
}

impl StructuralAccessors {
    pub(crate) fn build(entity_types: &[EntityType], complex_types: &[ComplexType]) -> Result<Self> {
        let mut index = HashMap::new();
        let mut descriptors = Vec::with_capacity(entity_types.len() + complex_types.len());

        // Slots first so complex properties can point at types declared later.
        for entity_type in entity_types {
            index.insert(entity_type.qualified_name(), descriptors.len());
            descriptors.push(TypeDescriptor {
                qualified_name: entity_type.qualified_name(),
                is_entity: true,
                key: entity_type.key.clone(),
                properties: Vec::new(),
                navigation: Vec::new(),
            });
        }
        for complex_type in complex_types {
            index.insert(complex_type.qualified_name(), descriptors.len());
            descriptors.push(TypeDescriptor {
                qualified_name: complex_type.qualified_name(),
                is_entity: false,
                key: Vec::new(),
                properties: Vec::new(),
                navigation: Vec::new(),
            });
        }

        let resolve = |property: &crate::model::Property| -> Result<PropertyDescriptor> {
            let type_ref = property.type_ref();
            let kind = match type_ref.primitive() {
                Some(primitive) => PropertyKind::Primitive(primitive),
                None => match index.get(&type_ref.name) {
                    Some(idx) if !descriptors[*idx].is_entity => PropertyKind::Complex(*idx),
                    _ => return Err(EdmError::UnknownType(type_ref.name.clone())),
                },
            };
            Ok(PropertyDescriptor {
                name: property.name.clone(),
                type_ref,
                nullable: property.nullable,
                kind,
            })
        };

        let mut resolved = Vec::with_capacity(descriptors.len());
        for entity_type in entity_types {
            let properties = entity_type
                .properties
                .iter()
                .map(&resolve)
                .collect::<Result<Vec<_>>>()?;
            let navigation = entity_type
                .navigation_properties
                .iter()
                .map(|nav| {
                    let type_ref = nav.type_ref();
                    NavigationDescriptor {
                        name: nav.name.clone(),
                        target: type_ref.name,
                        collection: type_ref.collection,
                        nullable: nav.nullable,
                    }
                })
                .collect();
            resolved.push((properties, navigation));
        }
        for complex_type in complex_types {
            let properties = complex_type
                .properties
                .iter()
                .map(&resolve)
                .collect::<Result<Vec<_>>>()?;
            resolved.push((properties, Vec::new()));
        }

        for (descriptor, (properties, navigation)) in descriptors.iter_mut().zip(resolved) {
            descriptor.properties = properties;
            descriptor.navigation = navigation;
        }

        Ok(Self { descriptors, index })
    }

    pub fn get(&self, qualified_name: &str) -> Option<&TypeDescriptor> {
        self.index
            .get(qualified_name)
            .and_then(|idx| self.descriptors.get(*idx))
    }

    pub fn at(&self, idx: usize) -> &TypeDescriptor {
        &self.descriptors[idx]
    }

    pub fn extract_key(&self, entity: &Entity) -> Result<Vec<(String, PrimitiveValue)>> {
        let descriptor = self
            .get(&entity.type_name)
            .ok_or_else(|| EdmError::UnknownType(entity.type_name.clone()))?;
        descriptor.extract_key(entity)
    }
}

/// Formats key values the way they appear between parentheses in a resource path.
///
/// A single key is written bare (`5`, `'abc'`), composite keys as `Name=value` pairs.
pub fn format_key(key: &[(String, PrimitiveValue)]) -> String {
    match key {
        [(_, value)] => value.to_uri_literal(),
        _ => key
            .iter()
            .map(|(name, value)| format!("{}={}", name, value.to_uri_literal()))
            .collect::<Vec<_>>()
            .join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EdmBuilder;
    use crate::model::{Edm, EntitySet, Property};

    fn edm() -> Edm {
        EdmBuilder::new("Test", "TestService")
            .complex_type(
                ComplexType::new("Point")
                    .with_property(Property::new("X", "Edm.Double").required()),
            )
            .entity_type(
                EntityType::new("Shape", &["Kind", "Id"])
                    .with_property(Property::new("Kind", "Edm.String").required())
                    .with_property(Property::new("Id", "Edm.Int32").required())
                    .with_property(Property::new("Origin", "Test.Point")),
            )
            .entity_set(EntitySet::new("Shapes", "Test.Shape"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_descriptor_resolves_complex_slots() {
        let edm = edm();
        let shape = edm.accessors().get("Test.Shape").unwrap();
        let origin = shape.property("Origin").unwrap();
        match origin.kind {
            PropertyKind::Complex(idx) => {
                assert_eq!(edm.accessors().at(idx).qualified_name, "Test.Point")
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(shape.is_key("Id"));
        assert!(!shape.is_key("Origin"));
    }

    #[test]
    fn test_extract_and_format_composite_key() {
        let edm = edm();
        let entity = Entity::new("Test.Shape")
            .with_property("Id", PrimitiveValue::Int32(3))
            .with_property("Kind", PrimitiveValue::String("o'clock".into()));

        let key = edm.accessors().extract_key(&entity).unwrap();
        assert_eq!(format_key(&key), "Kind='o''clock',Id=3");
    }

    #[test]
    fn test_extract_key_reports_missing_property() {
        let edm = edm();
        let entity = Entity::new("Test.Shape").with_property("Id", PrimitiveValue::Int32(3));
        let err = edm.accessors().extract_key(&entity).unwrap_err();
        assert_eq!(
            err,
            EdmError::MissingKey {
                type_name: "Test.Shape".into(),
                property: "Kind".into()
            }
        );
    }
}
