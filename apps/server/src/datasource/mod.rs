//! Data source abstractions
//!
//! A [`DataSourceProvider`] claims entity types, hands out the
//! [`DataSource`] that persists them, and supplies a query strategy per query
//! model. Providers are consulted in registration order.

pub mod memory;

use crate::error::{Error, Result};
use crate::processor::{QueryOperation, QueryOperationStrategy};
use crate::request::ODataRequestContext;
use oxidata_edm::{Edm, Entity, KeyValue, ODataUri, PrimitiveValue, ResourcePath, TargetType};
use std::fmt;
use std::sync::Arc;

pub use memory::{InMemoryDataSource, InMemoryProvider, InMemoryStore};

/// An entity set plus a complete, named key.
#[derive(Debug, Clone)]
pub struct EntityAddress {
    pub entity_set: String,
    pub key: Vec<(String, PrimitiveValue)>,
}

impl EntityAddress {
    pub fn new(entity_set: impl Into<String>, key: Vec<(String, PrimitiveValue)>) -> Self {
        Self {
            entity_set: entity_set.into(),
            key,
        }
    }

    /// Address of `entity` in the set the model declares for its type.
    pub fn of_entity(edm: &Edm, entity: &Entity) -> Result<Self> {
        let set = edm.entity_set_for_type(&entity.type_name).ok_or_else(|| {
            Error::TargetType(format!("no entity set holds {}", entity.type_name))
        })?;
        Ok(Self::new(set.name.clone(), edm.accessors().extract_key(entity)?))
    }

    /// Same set and key values (numeric keys compare by value).
    pub fn matches(&self, other: &EntityAddress) -> bool {
        self.entity_set == other.entity_set && keys_equal(&self.key, &other.key)
    }

    pub fn matches_entity(&self, edm: &Edm, entity: &Entity) -> bool {
        edm.accessors()
            .extract_key(entity)
            .map(|key| keys_equal(&self.key, &key))
            .unwrap_or(false)
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity_set, oxidata_edm::format_key(&self.key))
    }
}

pub fn keys_equal(a: &[(String, PrimitiveValue)], b: &[(String, PrimitiveValue)]) -> bool {
    a.len() == b.len()
        && a.iter().all(|(name, value)| {
            b.iter()
                .any(|(other_name, other)| other_name == name && value.key_equals(other))
        })
}

/// Names a URI key predicate by the entity type's key declaration.
pub fn named_key(edm: &Edm, type_name: &str, key: &[KeyValue]) -> Result<Vec<(String, PrimitiveValue)>> {
    let descriptor = edm
        .accessors()
        .get(type_name)
        .ok_or_else(|| Error::TargetType(format!("unknown entity type {type_name}")))?;
    if key.len() != descriptor.key.len() {
        return Err(Error::bad_request(format!(
            "key of {type_name} needs {} values, got {}",
            descriptor.key.len(),
            key.len()
        )));
    }
    key.iter()
        .enumerate()
        .map(|(idx, kv)| {
            let name = kv.name.clone().unwrap_or_else(|| descriptor.key[idx].clone());
            if !descriptor.is_key(&name) {
                return Err(Error::bad_request_at(
                    format!("{name} is not a key property of {type_name}"),
                    name,
                ));
            }
            Ok((name, kv.value.clone()))
        })
        .collect()
}

/// A navigation link between two entities. Without a target, a delete
/// removes whatever a single-valued navigation points at.
#[derive(Debug, Clone)]
pub struct ODataLink {
    pub source: ResourcePath,
    pub property: String,
    pub target: Option<ResourcePath>,
}

/// Partial entity for PATCH: only `changed` properties are applied.
#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub entity: Entity,
    pub changed: Vec<String>,
}

impl PatchInfo {
    pub fn from_entity(entity: Entity) -> Self {
        let changed = entity
            .properties
            .keys()
            .chain(entity.links.keys())
            .cloned()
            .collect();
        Self { entity, changed }
    }
}

pub trait DataSource: Send + Sync {
    /// Creates the entity addressed by `uri` (a collection) and returns it as stored.
    fn create(&self, uri: &ODataUri, entity: &Entity, edm: &Edm) -> Result<Entity>;

    /// Replaces the entity addressed by `uri`.
    fn update(&self, uri: &ODataUri, entity: &Entity, edm: &Edm) -> Result<Entity>;

    fn delete(&self, uri: &ODataUri, edm: &Edm) -> Result<()>;

    fn create_link(&self, uri: &ODataUri, link: &ODataLink, edm: &Edm) -> Result<()>;

    fn delete_link(&self, uri: &ODataUri, link: &ODataLink, edm: &Edm) -> Result<()>;

    fn start_transaction(&self) -> Result<Box<dyn TransactionalDataSource>>;

    /// Native partial update; `None` makes PATCH fall back to a full update.
    fn patch_support(&self) -> Option<&dyn DataSourcePatchSupport> {
        None
    }
}

pub trait DataSourcePatchSupport {
    fn patch(&self, uri: &ODataUri, patch: &PatchInfo, edm: &Edm) -> Result<Entity>;
}

/// A data source whose writes stay invisible until `commit`.
pub trait TransactionalDataSource: DataSource {
    /// `Ok(false)` when the source declined to commit; nothing was applied.
    fn commit(&self) -> Result<bool>;

    fn rollback(&self) -> Result<()>;

    fn is_active(&self) -> bool;

    fn as_data_source(&self) -> &dyn DataSource;
}

pub trait DataSourceProvider: Send + Sync {
    fn is_suitable_for(&self, ctx: &ODataRequestContext, entity_type: &str) -> bool;

    fn data_source(&self, ctx: &ODataRequestContext) -> Arc<dyn DataSource>;

    /// Strategy evaluating `operation`, or `None` when it is not supported.
    fn strategy(
        &self,
        ctx: &ODataRequestContext,
        operation: &QueryOperation,
        target: &TargetType,
    ) -> Option<Box<dyn QueryOperationStrategy>>;
}

#[derive(Default, Clone)]
pub struct DataSourceProviderRegistry {
    providers: Vec<Arc<dyn DataSourceProvider>>,
}

impl DataSourceProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn DataSourceProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_for(
        &self,
        ctx: &ODataRequestContext,
        entity_type: &str,
    ) -> Result<&dyn DataSourceProvider> {
        self.providers
            .iter()
            .find(|p| p.is_suitable_for(ctx, entity_type))
            .map(|p| p.as_ref())
            .ok_or_else(|| Error::DataSource(format!("no data source provider for {entity_type}")))
    }

    pub fn data_source_for(
        &self,
        ctx: &ODataRequestContext,
        entity_type: &str,
    ) -> Result<Arc<dyn DataSource>> {
        Ok(self.provider_for(ctx, entity_type)?.data_source(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use rust_decimal::Decimal;

    #[test]
    fn test_keys_compare_across_widths() {
        let a = vec![("Id".to_string(), PrimitiveValue::Int32(5))];
        let b = vec![("Id".to_string(), PrimitiveValue::Int64(5))];
        let c = vec![("Id".to_string(), PrimitiveValue::Decimal(Decimal::new(50, 1)))];
        assert!(keys_equal(&a, &b));
        assert!(keys_equal(&a, &c));
        assert!(!keys_equal(&a, &[("Id".to_string(), PrimitiveValue::Int64(6))]));
    }

    #[test]
    fn test_named_key_fills_positional_names() {
        let edm = test_support::edm();
        let key = vec![KeyValue {
            name: None,
            value: PrimitiveValue::Int64(3),
        }];
        let named = named_key(&edm, "Demo.Customer", &key).unwrap();
        assert_eq!(named[0].0, "Id");

        let wrong = vec![KeyValue {
            name: Some("Name".to_string()),
            value: PrimitiveValue::String("x".to_string()),
        }];
        assert!(named_key(&edm, "Demo.Customer", &wrong).is_err());
    }

    #[test]
    fn test_patch_info_tracks_present_properties() {
        let patch = PatchInfo::from_entity(
            Entity::new("Demo.Customer").with_property("Name", "Ann"),
        );
        assert_eq!(patch.changed, vec!["Name".to_string()]);
    }
}
