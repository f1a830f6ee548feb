//! In-memory reference data source
//!
//! Entities live per entity set; navigation links are kept beside them and
//! followed in both directions through partner declarations. Every write is
//! applied to a copy of the state and swapped in, so a failing write leaves
//! nothing behind. Transactions work on a private copy and replay their
//! mutation log against the live state on commit.

use super::{
    keys_equal, named_key, DataSource, DataSourcePatchSupport, DataSourceProvider, EntityAddress,
    ODataLink, PatchInfo, TransactionalDataSource,
};
use crate::error::{Error, Result};
use crate::processor::strategy::FailureKind;
use crate::processor::{QueryOperation, QueryOperationStrategy, QueryResult, ResultItem, StrategyOutcome};
use crate::request::ODataRequestContext;
use oxidata_edm::accessor::NavigationDescriptor;
use oxidata_edm::{
    format_key, Edm, Entity, KeyValue, NavigationLink, ODataUri, PathSegment, PrimitiveValue,
    ResourcePath, TargetType, Value,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct StoredLink {
    source: EntityAddress,
    property: String,
    target: EntityAddress,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    sets: HashMap<String, Vec<Entity>>,
    links: Vec<StoredLink>,
}

#[derive(Debug, Clone)]
enum Mutation {
    Create {
        entity_set: String,
        entity: Entity,
        parent: Option<(EntityAddress, String)>,
    },
    Update {
        address: EntityAddress,
        entity: Entity,
    },
    Patch {
        address: EntityAddress,
        patch: PatchInfo,
    },
    Delete {
        address: EntityAddress,
    },
    CreateLink {
        source: EntityAddress,
        property: String,
        target: EntityAddress,
    },
    DeleteLink {
        source: EntityAddress,
        property: String,
        target: Option<EntityAddress>,
    },
}

enum Scope {
    Set(String),
    Linked {
        from: EntityAddress,
        property: String,
        target_set: String,
    },
    One(EntityAddress),
}

fn entity_type_of_set<'a>(edm: &'a Edm, entity_set: &str) -> Result<&'a str> {
    edm.entity_set(entity_set)
        .map(|set| set.entity_type.as_str())
        .ok_or_else(|| Error::TargetType(format!("unknown entity set {entity_set}")))
}

fn set_for_type(edm: &Edm, type_name: &str) -> Result<String> {
    edm.entity_set_for_type(type_name)
        .map(|set| set.name.clone())
        .ok_or_else(|| Error::TargetType(format!("no entity set holds {type_name}")))
}

fn navigation(edm: &Edm, from: &EntityAddress, property: &str) -> Result<NavigationDescriptor> {
    let type_name = entity_type_of_set(edm, &from.entity_set)?;
    edm.accessors()
        .get(type_name)
        .and_then(|descriptor| descriptor.navigation(property))
        .cloned()
        .ok_or_else(|| {
            Error::bad_request_at(
                format!("{type_name} has no navigation property {property}"),
                property,
            )
        })
}

fn partner_of(edm: &Edm, from: &EntityAddress, property: &str) -> Option<String> {
    let type_name = entity_type_of_set(edm, &from.entity_set).ok()?;
    edm.entity_type(type_name)?
        .navigation_property(property)?
        .partner
        .clone()
}

impl StoreState {
    fn entities(&self, entity_set: &str) -> &[Entity] {
        self.sets.get(entity_set).map(Vec::as_slice).unwrap_or(&[])
    }

    fn position(&self, edm: &Edm, address: &EntityAddress) -> Option<usize> {
        self.sets
            .get(&address.entity_set)?
            .iter()
            .position(|entity| address.matches_entity(edm, entity))
    }

    fn find(&self, edm: &Edm, address: &EntityAddress) -> Option<&Entity> {
        let idx = self.position(edm, address)?;
        self.sets.get(&address.entity_set)?.get(idx)
    }

    fn require(&self, edm: &Edm, address: &EntityAddress) -> Result<&Entity> {
        self.find(edm, address)
            .ok_or_else(|| Error::EntityNotFound(address.to_string()))
    }

    fn keyed(&self, edm: &Edm, entity_set: &str, key: &[KeyValue]) -> Result<EntityAddress> {
        let type_name = entity_type_of_set(edm, entity_set)?;
        Ok(EntityAddress::new(entity_set, named_key(edm, type_name, key)?))
    }

    /// Walks `path` to the single entity it addresses.
    fn resolve(&self, edm: &Edm, path: &ResourcePath) -> Result<EntityAddress> {
        let mut scope: Option<Scope> = None;
        for segment in &path.segments {
            scope = Some(match (segment, scope.take()) {
                (PathSegment::EntitySet(name), None) => Scope::Set(name.clone()),
                (PathSegment::Key(key), Some(Scope::Set(entity_set))) => {
                    let address = self.keyed(edm, &entity_set, key)?;
                    self.require(edm, &address)?;
                    Scope::One(address)
                }
                (
                    PathSegment::Key(key),
                    Some(Scope::Linked {
                        from,
                        property,
                        target_set,
                    }),
                ) => {
                    let address = self.keyed(edm, &target_set, key)?;
                    if !self
                        .linked(edm, &from, &property)
                        .iter()
                        .any(|target| target.matches(&address))
                    {
                        return Err(Error::EntityNotFound(format!("{from}/{property}/{address}")));
                    }
                    Scope::One(address)
                }
                (PathSegment::Navigation(property), Some(Scope::One(from))) => {
                    let nav = navigation(edm, &from, property)?;
                    let target_set = set_for_type(edm, &nav.target)?;
                    if nav.collection {
                        Scope::Linked {
                            from,
                            property: property.clone(),
                            target_set,
                        }
                    } else {
                        let target = self
                            .linked(edm, &from, property)
                            .into_iter()
                            .next()
                            .ok_or_else(|| Error::EntityNotFound(format!("{from}/{property}")))?;
                        Scope::One(target)
                    }
                }
                (segment, _) => {
                    return Err(Error::bad_request(format!(
                        "{segment:?} does not address an entity"
                    )))
                }
            });
        }
        match scope {
            Some(Scope::One(address)) => Ok(address),
            _ => Err(Error::bad_request("path does not address a single entity")),
        }
    }

    /// Targets of `from.property`, including links stored from the partner side.
    fn linked(&self, edm: &Edm, from: &EntityAddress, property: &str) -> Vec<EntityAddress> {
        let mut targets: Vec<EntityAddress> = Vec::new();
        let mut push = |address: &EntityAddress| {
            if !targets.iter().any(|t| t.matches(address)) {
                targets.push(address.clone());
            }
        };
        for link in &self.links {
            if link.property == property && link.source.matches(from) {
                push(&link.target);
            }
        }
        if let Some(partner) = partner_of(edm, from, property) {
            for link in &self.links {
                if link.property == partner && link.target.matches(from) {
                    push(&link.source);
                }
            }
        }
        targets
    }

    fn remove_links(
        &mut self,
        edm: &Edm,
        from: &EntityAddress,
        property: &str,
        target: Option<&EntityAddress>,
    ) -> usize {
        let partner = partner_of(edm, from, property);
        let before = self.links.len();
        self.links.retain(|link| {
            let direct = link.property == property
                && link.source.matches(from)
                && target.map(|t| link.target.matches(t)).unwrap_or(true);
            let reverse = partner.as_deref() == Some(link.property.as_str())
                && link.target.matches(from)
                && target.map(|t| link.source.matches(t)).unwrap_or(true);
            !(direct || reverse)
        });
        before - self.links.len()
    }

    fn add_link(
        &mut self,
        edm: &Edm,
        source: &EntityAddress,
        property: &str,
        target: &EntityAddress,
    ) -> Result<()> {
        self.require(edm, source)?;
        self.require(edm, target)?;
        let nav = navigation(edm, source, property)?;
        if entity_type_of_set(edm, &target.entity_set)? != nav.target {
            return Err(Error::bad_request_at(
                format!("{target} cannot be linked through {property}"),
                property,
            ));
        }

        if !nav.collection {
            self.remove_links(edm, source, property, None);
        } else if self
            .linked(edm, source, property)
            .iter()
            .any(|t| t.matches(target))
        {
            return Err(Error::EntityAlreadyLinked {
                property: property.to_string(),
                target: target.to_string(),
            });
        }

        // A single-valued partner points at one entity only.
        if let Some(partner) = partner_of(edm, source, property) {
            if let Ok(partner_nav) = navigation(edm, target, &partner) {
                if !partner_nav.collection {
                    self.remove_links(edm, target, &partner, None);
                }
            }
        }

        self.links.push(StoredLink {
            source: source.clone(),
            property: property.to_string(),
            target: target.clone(),
        });
        Ok(())
    }

    fn apply(&mut self, edm: &Edm, mutation: &Mutation) -> Result<Option<Entity>> {
        match mutation {
            Mutation::Create {
                entity_set,
                entity,
                parent,
            } => {
                let key = edm
                    .accessors()
                    .extract_key(entity)
                    .map_err(|e| Error::bad_request(e.to_string()))?;
                let address = EntityAddress::new(entity_set.clone(), key);
                if self.find(edm, &address).is_some() {
                    return Err(Error::DuplicateKey {
                        entity_set: entity_set.clone(),
                        key: format_key(&address.key),
                    });
                }

                let mut stored = entity.clone();
                let inline = std::mem::take(&mut stored.links);
                self.sets
                    .entry(entity_set.clone())
                    .or_default()
                    .push(stored.clone());

                for (property, link) in inline {
                    let targets = match link {
                        NavigationLink::Single(Some(target)) => vec![*target],
                        NavigationLink::Single(None) => Vec::new(),
                        NavigationLink::Many(targets) => targets,
                    };
                    for target in targets {
                        let target_set = set_for_type(edm, &target.type_name)?;
                        let target_address = EntityAddress::new(
                            target_set.clone(),
                            edm.accessors()
                                .extract_key(&target)
                                .map_err(|e| Error::bad_request(e.to_string()))?,
                        );
                        if self.find(edm, &target_address).is_none() {
                            self.apply(
                                edm,
                                &Mutation::Create {
                                    entity_set: target_set,
                                    entity: target,
                                    parent: None,
                                },
                            )?;
                        }
                        self.add_link(edm, &address, &property, &target_address)?;
                    }
                }

                if let Some((parent, property)) = parent {
                    self.add_link(edm, parent, property, &address)?;
                }
                Ok(Some(stored))
            }
            Mutation::Update { address, entity } => {
                let idx = self
                    .position(edm, address)
                    .ok_or_else(|| Error::EntityNotFound(address.to_string()))?;
                let mut stored = entity.clone();
                stored.links.clear();
                if let Some(entities) = self.sets.get_mut(&address.entity_set) {
                    entities[idx] = stored.clone();
                }
                Ok(Some(stored))
            }
            Mutation::Patch { address, patch } => {
                let idx = self
                    .position(edm, address)
                    .ok_or_else(|| Error::EntityNotFound(address.to_string()))?;
                let entities = self
                    .sets
                    .get_mut(&address.entity_set)
                    .ok_or_else(|| Error::EntityNotFound(address.to_string()))?;
                let stored = &mut entities[idx];
                for name in &patch.changed {
                    if let Some(value) = patch.entity.properties.get(name) {
                        stored.properties.insert(name.clone(), value.clone());
                    }
                }
                Ok(Some(stored.clone()))
            }
            Mutation::Delete { address } => {
                let idx = self
                    .position(edm, address)
                    .ok_or_else(|| Error::EntityNotFound(address.to_string()))?;
                if let Some(entities) = self.sets.get_mut(&address.entity_set) {
                    entities.remove(idx);
                }
                self.links
                    .retain(|link| !link.source.matches(address) && !link.target.matches(address));
                Ok(None)
            }
            Mutation::CreateLink {
                source,
                property,
                target,
            } => {
                self.add_link(edm, source, property, target)?;
                Ok(None)
            }
            Mutation::DeleteLink {
                source,
                property,
                target,
            } => {
                self.require(edm, source)?;
                if self.remove_links(edm, source, property, target.as_ref()) == 0 {
                    return Err(Error::EntityNotFound(format!("no {property} link from {source}")));
                }
                Ok(None)
            }
        }
    }

    /// Applies `mutation` to a copy and swaps it in only on success.
    fn apply_atomically(&mut self, edm: &Edm, mutation: &Mutation) -> Result<Option<Entity>> {
        let mut next = self.clone();
        let result = next.apply(edm, mutation)?;
        *self = next;
        Ok(result)
    }
}

// ============================================================================
// Mutation planning
// ============================================================================

fn resource_path(uri: &ODataUri) -> Result<&ResourcePath> {
    uri.resource_path()
        .ok_or_else(|| Error::bad_request("URI does not address a resource"))
}

fn plan_create(state: &StoreState, edm: &Edm, uri: &ODataUri, entity: &Entity) -> Result<Mutation> {
    let path = resource_path(uri)?;
    let entity_set = path
        .entity_set(edm)
        .map(|set| set.name.clone())
        .ok_or_else(|| Error::TargetType(format!("no entity set behind {path:?}")))?;
    let parent = match path.last() {
        Some(PathSegment::Navigation(property)) => {
            Some((state.resolve(edm, &path.parent())?, property.clone()))
        }
        _ => None,
    };
    Ok(Mutation::Create {
        entity_set,
        entity: entity.clone(),
        parent,
    })
}

fn plan_link(state: &StoreState, edm: &Edm, link: &ODataLink, create: bool) -> Result<Mutation> {
    let source = state.resolve(edm, &link.source)?;
    let target = link
        .target
        .as_ref()
        .map(|path| state.resolve(edm, path))
        .transpose()?;
    if create {
        let target = target.ok_or_else(|| Error::bad_request("link target is required"))?;
        Ok(Mutation::CreateLink {
            source,
            property: link.property.clone(),
            target,
        })
    } else {
        Ok(Mutation::DeleteLink {
            source,
            property: link.property.clone(),
            target,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// Shared in-memory entity store.
#[derive(Clone)]
pub struct InMemoryStore {
    edm: Arc<Edm>,
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new(edm: Arc<Edm>) -> Self {
        Self {
            edm,
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    pub fn edm(&self) -> &Arc<Edm> {
        &self.edm
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| Error::DataSource("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Error::DataSource("in-memory store lock poisoned".to_string()))
    }

    fn mutate(&self, plan: impl FnOnce(&StoreState, &Edm) -> Result<Mutation>) -> Result<Option<Entity>> {
        let mut state = self.write()?;
        let mutation = plan(&state, &self.edm)?;
        state.apply_atomically(&self.edm, &mutation)
    }

    /// Adds `entity` (and any inline navigation targets) to the set declared for its type.
    pub fn insert(&self, entity: Entity) -> Result<Entity> {
        let entity_set = set_for_type(&self.edm, &entity.type_name)?;
        self.mutate(|_, _| {
            Ok(Mutation::Create {
                entity_set,
                entity,
                parent: None,
            })
        })?
        .ok_or_else(|| Error::Internal("create returned no entity".to_string()))
    }

    /// Links two stored entities through `property` of `source`.
    pub fn link(&self, source: &Entity, property: &str, target: &Entity) -> Result<()> {
        let source = EntityAddress::of_entity(&self.edm, source)?;
        let target = EntityAddress::of_entity(&self.edm, target)?;
        self.mutate(|_, _| {
            Ok(Mutation::CreateLink {
                source,
                property: property.to_string(),
                target,
            })
        })
        .map(|_| ())
    }

    /// Drops every entity and link.
    pub fn clear(&self) -> Result<()> {
        *self.write()? = StoreState::default();
        Ok(())
    }

    pub fn entities(&self, entity_set: &str) -> Result<Vec<Entity>> {
        Ok(self.read()?.entities(entity_set).to_vec())
    }

    pub fn get(&self, address: &EntityAddress) -> Result<Option<Entity>> {
        Ok(self.read()?.find(&self.edm, address).cloned())
    }

    pub fn linked(&self, address: &EntityAddress, property: &str) -> Result<Vec<Entity>> {
        let state = self.read()?;
        Ok(state
            .linked(&self.edm, address, property)
            .iter()
            .filter_map(|target| state.find(&self.edm, target).cloned())
            .collect())
    }

    /// Loads `{"EntitySet": [entity, ...], ...}`; returns the number of top-level entities.
    pub fn load_seed(&self, seed: &serde_json::Value) -> Result<usize> {
        let sets = seed
            .as_object()
            .ok_or_else(|| Error::bad_request("seed document must be a JSON object"))?;
        let mut loaded = 0;
        for (set_name, entities) in sets {
            let type_name = entity_type_of_set(&self.edm, set_name)?.to_string();
            let entities = entities.as_array().ok_or_else(|| {
                Error::bad_request(format!("seed entries for {set_name} must be an array"))
            })?;
            for json in entities {
                let entity = oxidata_format::json::entity_from_json(&self.edm, &type_name, json)
                    .map_err(|e| Error::Unmarshaller(e.to_string()))?;
                // Inline targets may already exist from an earlier set.
                let address = EntityAddress::of_entity(&self.edm, &entity)?;
                if self.get(&address)?.is_some() {
                    continue;
                }
                self.insert(entity)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

// ============================================================================
// Data source and transactions
// ============================================================================

pub struct InMemoryDataSource {
    store: InMemoryStore,
    native_patch: bool,
}

impl InMemoryDataSource {
    pub fn new(store: InMemoryStore, native_patch: bool) -> Self {
        Self {
            store,
            native_patch,
        }
    }
}

impl DataSource for InMemoryDataSource {
    fn create(&self, uri: &ODataUri, entity: &Entity, _edm: &Edm) -> Result<Entity> {
        self.store
            .mutate(|state, edm| plan_create(state, edm, uri, entity))?
            .ok_or_else(|| Error::Internal("create returned no entity".to_string()))
    }

    fn update(&self, uri: &ODataUri, entity: &Entity, _edm: &Edm) -> Result<Entity> {
        self.store
            .mutate(|state, edm| {
                Ok(Mutation::Update {
                    address: state.resolve(edm, resource_path(uri)?)?,
                    entity: entity.clone(),
                })
            })?
            .ok_or_else(|| Error::Internal("update returned no entity".to_string()))
    }

    fn delete(&self, uri: &ODataUri, _edm: &Edm) -> Result<()> {
        self.store
            .mutate(|state, edm| {
                Ok(Mutation::Delete {
                    address: state.resolve(edm, resource_path(uri)?)?,
                })
            })
            .map(|_| ())
    }

    fn create_link(&self, _uri: &ODataUri, link: &ODataLink, _edm: &Edm) -> Result<()> {
        self.store
            .mutate(|state, edm| plan_link(state, edm, link, true))
            .map(|_| ())
    }

    fn delete_link(&self, _uri: &ODataUri, link: &ODataLink, _edm: &Edm) -> Result<()> {
        self.store
            .mutate(|state, edm| plan_link(state, edm, link, false))
            .map(|_| ())
    }

    fn start_transaction(&self) -> Result<Box<dyn TransactionalDataSource>> {
        let snapshot = self.store.read()?.clone();
        Ok(Box::new(InMemoryTransaction {
            store: self.store.clone(),
            native_patch: self.native_patch,
            scratch: Mutex::new(snapshot),
            log: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
        }))
    }

    fn patch_support(&self) -> Option<&dyn DataSourcePatchSupport> {
        self.native_patch.then_some(self as &dyn DataSourcePatchSupport)
    }
}

impl DataSourcePatchSupport for InMemoryDataSource {
    fn patch(&self, uri: &ODataUri, patch: &PatchInfo, _edm: &Edm) -> Result<Entity> {
        self.store
            .mutate(|state, edm| {
                Ok(Mutation::Patch {
                    address: state.resolve(edm, resource_path(uri)?)?,
                    patch: patch.clone(),
                })
            })?
            .ok_or_else(|| Error::Internal("patch returned no entity".to_string()))
    }
}

pub struct InMemoryTransaction {
    store: InMemoryStore,
    native_patch: bool,
    scratch: Mutex<StoreState>,
    log: Mutex<Vec<Mutation>>,
    active: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::DataSource("transaction lock poisoned".to_string()))
}

impl InMemoryTransaction {
    fn mutate(&self, plan: impl FnOnce(&StoreState, &Edm) -> Result<Mutation>) -> Result<Option<Entity>> {
        if !self.is_active() {
            return Err(Error::DataSource("transaction is no longer active".to_string()));
        }
        let edm = self.store.edm();
        let mut scratch = lock(&self.scratch)?;
        let mutation = plan(&scratch, edm)?;
        let result = scratch.apply_atomically(edm, &mutation)?;
        lock(&self.log)?.push(mutation);
        Ok(result)
    }
}

impl DataSource for InMemoryTransaction {
    fn create(&self, uri: &ODataUri, entity: &Entity, _edm: &Edm) -> Result<Entity> {
        self.mutate(|state, edm| plan_create(state, edm, uri, entity))?
            .ok_or_else(|| Error::Internal("create returned no entity".to_string()))
    }

    fn update(&self, uri: &ODataUri, entity: &Entity, _edm: &Edm) -> Result<Entity> {
        self.mutate(|state, edm| {
            Ok(Mutation::Update {
                address: state.resolve(edm, resource_path(uri)?)?,
                entity: entity.clone(),
            })
        })?
        .ok_or_else(|| Error::Internal("update returned no entity".to_string()))
    }

    fn delete(&self, uri: &ODataUri, _edm: &Edm) -> Result<()> {
        self.mutate(|state, edm| {
            Ok(Mutation::Delete {
                address: state.resolve(edm, resource_path(uri)?)?,
            })
        })
        .map(|_| ())
    }

    fn create_link(&self, _uri: &ODataUri, link: &ODataLink, _edm: &Edm) -> Result<()> {
        self.mutate(|state, edm| plan_link(state, edm, link, true))
            .map(|_| ())
    }

    fn delete_link(&self, _uri: &ODataUri, link: &ODataLink, _edm: &Edm) -> Result<()> {
        self.mutate(|state, edm| plan_link(state, edm, link, false))
            .map(|_| ())
    }

    fn start_transaction(&self) -> Result<Box<dyn TransactionalDataSource>> {
        Err(Error::DataSource(
            "nested transactions are not supported".to_string(),
        ))
    }

    fn patch_support(&self) -> Option<&dyn DataSourcePatchSupport> {
        self.native_patch.then_some(self as &dyn DataSourcePatchSupport)
    }
}

impl DataSourcePatchSupport for InMemoryTransaction {
    fn patch(&self, uri: &ODataUri, patch: &PatchInfo, _edm: &Edm) -> Result<Entity> {
        self.mutate(|state, edm| {
            Ok(Mutation::Patch {
                address: state.resolve(edm, resource_path(uri)?)?,
                patch: patch.clone(),
            })
        })?
        .ok_or_else(|| Error::Internal("patch returned no entity".to_string()))
    }
}

impl TransactionalDataSource for InMemoryTransaction {
    fn commit(&self) -> Result<bool> {
        if !self.active.swap(false, AtomicOrdering::SeqCst) {
            return Err(Error::DataSource("transaction is no longer active".to_string()));
        }
        let log = std::mem::take(&mut *lock(&self.log)?);
        let edm = self.store.edm();

        let mut live = self.store.write()?;
        let mut next = live.clone();
        for mutation in &log {
            if let Err(e) = next.apply(edm, mutation) {
                tracing::warn!(error = %e, "Transaction conflicts with concurrent changes, nothing committed");
                return Err(Error::DataSource(format!("commit failed: {e}")));
            }
        }
        *live = next;
        tracing::debug!(mutations = log.len(), "Transaction committed");
        Ok(true)
    }

    fn rollback(&self) -> Result<()> {
        if self.active.swap(false, AtomicOrdering::SeqCst) {
            lock(&self.log)?.clear();
            tracing::debug!("Transaction rolled back");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(AtomicOrdering::SeqCst)
    }

    fn as_data_source(&self) -> &dyn DataSource {
        self
    }
}

// ============================================================================
// Query strategy
// ============================================================================

enum Node {
    Entities {
        items: Vec<Entity>,
        count: Option<usize>,
    },
    Value(Value),
}

type Eval<T> = std::result::Result<T, StrategyOutcome>;

fn failure(kind: FailureKind, message: impl Into<String>) -> StrategyOutcome {
    StrategyOutcome::Failure(kind, message.into())
}

/// `Name [asc|desc], ...` over top-level properties.
fn parse_orderby(expression: &str) -> Option<Vec<(String, bool)>> {
    expression
        .split(',')
        .map(|item| {
            let mut parts = item.split_whitespace();
            let name = parts.next()?;
            if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return None;
            }
            let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(_) => return None,
            };
            parts.next().is_none().then(|| (name.to_string(), descending))
        })
        .collect()
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let primitive = |v: Option<&Value>| v.and_then(Value::as_primitive).cloned();
    match (primitive(a), primitive(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_primitives(&a, &b),
    }
}

fn compare_primitives(a: &PrimitiveValue, b: &PrimitiveValue) -> Ordering {
    if a.is_numeric() && b.is_numeric() {
        if let (Some(a), Some(b)) = (a.to_decimal(), b.to_decimal()) {
            return a.cmp(&b);
        }
    }
    a.to_text().cmp(&b.to_text())
}

struct InMemoryStrategy {
    store: InMemoryStore,
    operation: QueryOperation,
}

impl InMemoryStrategy {
    fn entities(&self, state: &StoreState, op: &QueryOperation) -> Eval<(Vec<Entity>, Option<usize>)> {
        match self.evaluate(state, op)? {
            Node::Entities { items, count } => Ok((items, count)),
            Node::Value(_) => Err(failure(
                FailureKind::QueryProcessing,
                format!("{op:?} does not yield entities"),
            )),
        }
    }

    fn single(&self, state: &StoreState, op: &QueryOperation) -> Eval<Entity> {
        let (mut items, _) = self.entities(state, op)?;
        match items.len() {
            0 => Err(StrategyOutcome::NotFound(format!("{op:?}"))),
            1 => Ok(items.remove(0)),
            _ => Err(StrategyOutcome::Ambiguous(format!("{op:?}"))),
        }
    }

    fn evaluate(&self, state: &StoreState, op: &QueryOperation) -> Eval<Node> {
        let edm = self.store.edm();
        Ok(match op {
            QueryOperation::SelectSet { entity_set } => Node::Entities {
                items: state.entities(entity_set).to_vec(),
                count: None,
            },
            QueryOperation::ByKey { source, key } => {
                let (items, _) = self.entities(state, source)?;
                let mut matched = Vec::new();
                for entity in items {
                    let wanted = named_key(edm, &entity.type_name, key)
                        .map_err(|e| failure(FailureKind::BadRequest, e.to_string()))?;
                    let found = edm
                        .accessors()
                        .extract_key(&entity)
                        .map(|actual| keys_equal(&actual, &wanted))
                        .unwrap_or(false);
                    if found {
                        matched.push(entity);
                    }
                }
                Node::Entities {
                    items: matched,
                    count: None,
                }
            }
            QueryOperation::Navigate { source, property } => {
                let entity = self.single(state, source)?;
                let address = EntityAddress::of_entity(edm, &entity)
                    .map_err(|e| failure(FailureKind::DataSource, e.to_string()))?;
                let items = state
                    .linked(edm, &address, property)
                    .iter()
                    .filter_map(|target| state.find(edm, target).cloned())
                    .collect();
                Node::Entities { items, count: None }
            }
            QueryOperation::Property { source, property } => {
                let (owner, value) = match self.evaluate(state, source)? {
                    Node::Entities { .. } => {
                        let entity = self.single(state, source)?;
                        let value = entity.property(property).cloned();
                        (entity.type_name, value)
                    }
                    Node::Value(Value::Complex(complex)) => {
                        let value = complex.property(property).cloned();
                        (complex.type_name, value)
                    }
                    Node::Value(_) => {
                        return Err(failure(
                            FailureKind::QueryProcessing,
                            format!("{property} is not reachable from a primitive value"),
                        ))
                    }
                };
                let collection = edm
                    .accessors()
                    .get(&owner)
                    .and_then(|descriptor| descriptor.property(property))
                    .is_some_and(|p| p.type_ref.collection);
                match value {
                    Some(value) => Node::Value(value),
                    // An absent collection-valued property is an empty collection.
                    None if collection => Node::Value(Value::Collection(Vec::new())),
                    None => Node::Value(Value::Null),
                }
            }
            QueryOperation::Count { source } => {
                let count = match self.evaluate(state, source)? {
                    Node::Entities { items, .. } => items.len(),
                    Node::Value(Value::Collection(items)) => items.len(),
                    Node::Value(_) => {
                        return Err(failure(FailureKind::QueryProcessing, "$count needs a collection"))
                    }
                };
                Node::Value(Value::from(count as i64))
            }
            QueryOperation::InlineCount { source } => {
                let (items, _) = self.entities(state, source)?;
                let count = Some(items.len());
                Node::Entities { items, count }
            }
            QueryOperation::Skip { source, count: skip } => {
                let (items, count) = self.entities(state, source)?;
                Node::Entities {
                    items: items.into_iter().skip(*skip).collect(),
                    count,
                }
            }
            QueryOperation::Limit { source, count: top } => {
                let (items, count) = self.entities(state, source)?;
                Node::Entities {
                    items: items.into_iter().take(*top).collect(),
                    count,
                }
            }
            QueryOperation::OrderBy { source, expression } => {
                let (mut items, count) = self.entities(state, source)?;
                let order = parse_orderby(expression).ok_or_else(|| {
                    failure(FailureKind::NotImplemented, format!("$orderby={expression}"))
                })?;
                items.sort_by(|a, b| {
                    order
                        .iter()
                        .map(|(name, descending)| {
                            let ordering = compare_values(a.property(name), b.property(name));
                            if *descending {
                                ordering.reverse()
                            } else {
                                ordering
                            }
                        })
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
                Node::Entities { items, count }
            }
            QueryOperation::SelectProperties { source, properties } => {
                let (items, count) = self.entities(state, source)?;
                let mut projected = Vec::with_capacity(items.len());
                for mut entity in items {
                    let descriptor = edm.accessors().get(&entity.type_name).ok_or_else(|| {
                        failure(FailureKind::DataSource, format!("unknown type {}", entity.type_name))
                    })?;
                    if let Some(unknown) = properties.iter().find(|p| descriptor.property(p).is_none()) {
                        return Err(failure(
                            FailureKind::BadRequest,
                            format!("$select names unknown property {unknown}"),
                        ));
                    }
                    entity
                        .properties
                        .retain(|name, _| descriptor.is_key(name) || properties.contains(name));
                    projected.push(entity);
                }
                Node::Entities {
                    items: projected,
                    count,
                }
            }
            QueryOperation::Filter { .. }
            | QueryOperation::Search { .. }
            | QueryOperation::Expand { .. } => {
                return Err(failure(
                    FailureKind::NotImplemented,
                    format!("{op:?} is not evaluated in memory"),
                ))
            }
        })
    }
}

impl QueryOperationStrategy for InMemoryStrategy {
    fn execute(&self, _ctx: &ODataRequestContext) -> StrategyOutcome {
        let state = match self.store.read() {
            Ok(state) => state,
            Err(e) => return failure(FailureKind::DataSource, e.to_string()),
        };
        match self.evaluate(&state, &self.operation) {
            Ok(Node::Entities { items, count }) => StrategyOutcome::Ok(QueryResult::Collection {
                items: items.into_iter().map(ResultItem::Entity).collect(),
                count,
            }),
            Ok(Node::Value(value)) => StrategyOutcome::Ok(QueryResult::value(value)),
            Err(outcome) => outcome,
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

pub struct InMemoryProvider {
    store: InMemoryStore,
    native_patch: bool,
    entity_types: Option<Vec<String>>,
}

impl InMemoryProvider {
    /// Provider serving every entity type of the store's model.
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            native_patch: true,
            entity_types: None,
        }
    }

    pub fn with_native_patch(mut self, enabled: bool) -> Self {
        self.native_patch = enabled;
        self
    }

    /// Restricts the provider to the given qualified entity type names.
    pub fn for_types(mut self, entity_types: &[&str]) -> Self {
        self.entity_types = Some(entity_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    fn supports(operation: &QueryOperation) -> bool {
        operation.chain().all(|op| match op {
            QueryOperation::Filter { .. }
            | QueryOperation::Search { .. }
            | QueryOperation::Expand { .. } => false,
            QueryOperation::OrderBy { expression, .. } => parse_orderby(expression).is_some(),
            _ => true,
        })
    }
}

impl DataSourceProvider for InMemoryProvider {
    fn is_suitable_for(&self, _ctx: &ODataRequestContext, entity_type: &str) -> bool {
        match &self.entity_types {
            Some(types) => types.iter().any(|t| t == entity_type),
            None => self.store.edm().entity_type(entity_type).is_some(),
        }
    }

    fn data_source(&self, _ctx: &ODataRequestContext) -> Arc<dyn DataSource> {
        Arc::new(InMemoryDataSource::new(self.store.clone(), self.native_patch))
    }

    fn strategy(
        &self,
        _ctx: &ODataRequestContext,
        operation: &QueryOperation,
        _target: &TargetType,
    ) -> Option<Box<dyn QueryOperationStrategy>> {
        if !Self::supports(operation) {
            return None;
        }
        Some(Box::new(InMemoryStrategy {
            store: self.store.clone(),
            operation: operation.clone(),
        }))
    }
}
