//! Parsed resource URIs
//!
//! An [`ODataUri`] is produced once per request by [`parse_uri`] and only read
//! afterwards. Its kind is exactly one of service root, `$metadata`, `$batch`,
//! a resource path, or a `$ref` path.

mod parser;

pub use parser::{parse_entity_reference, parse_literal, parse_uri};

use crate::model::{Edm, EntitySet, OperationKind, PrimitiveType, TypeKind, TypeRef};
use crate::value::PrimitiveValue;

#[derive(Debug, Clone, PartialEq)]
pub struct ODataUri {
    /// Absolute service root without a trailing slash.
    pub service_root: String,
    pub kind: UriKind,
    pub options: QueryOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UriKind {
    ServiceRoot,
    Metadata,
    Batch,
    Resource(ResourcePath),
    /// `$ref` path; the segments address the entity or collection whose references are wanted.
    Ref(ResourcePath),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub orderby: Option<String>,
    pub expand: Option<String>,
    pub select: Option<String>,
    pub search: Option<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: bool,
    pub format: Option<String>,
    /// `$id` of a `$ref` request.
    pub id: Option<String>,
    /// Custom options and parameter aliases (`@name`), in request order.
    pub custom: Vec<(String, String)>,
}

impl QueryOptions {
    pub fn custom(&self, name: &str) -> Option<&str> {
        self.custom
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub name: Option<String>,
    pub value: PrimitiveValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationCall {
    /// Import name for unbound calls, qualified operation name for bound calls.
    pub name: String,
    pub kind: OperationKind,
    pub bound: bool,
    /// Parameter literals as written in the path, not yet converted.
    pub parameters: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    EntitySet(String),
    Key(Vec<KeyValue>),
    Navigation(String),
    Property(String),
    Count,
    Value,
    Operation(OperationCall),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcePath {
    pub segments: Vec<PathSegment>,
}

impl ResourcePath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Key predicate of the last addressed entity.
    pub fn key(&self) -> Option<&[KeyValue]> {
        self.segments.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_slice()),
            _ => None,
        })
    }

    pub fn operation(&self) -> Option<&OperationCall> {
        match self.segments.last()? {
            PathSegment::Operation(call) => Some(call),
            _ => None,
        }
    }

    /// Path without its trailing segment.
    pub fn parent(&self) -> ResourcePath {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// Entity set that holds the entities this path ends on.
    pub fn entity_set<'a>(&self, edm: &'a Edm) -> Option<&'a EntitySet> {
        let mut current: Option<&'a EntitySet> = None;
        let mut current_type: Option<String> = None;
        for segment in &self.segments {
            match segment {
                PathSegment::EntitySet(name) => {
                    current = edm.entity_set(name);
                    current_type = current.map(|set| set.entity_type.clone());
                }
                PathSegment::Navigation(name) => {
                    let entity_type = edm.entity_type(current_type.as_deref()?)?;
                    let target = entity_type.navigation_property(name)?.type_ref().name;
                    current = edm.entity_set_for_type(&target);
                    current_type = Some(target);
                }
                PathSegment::Key(_) => {}
                _ => return None,
            }
        }
        current
    }

    /// Walks the path against `edm`; `None` when no single type can be determined.
    pub fn target_type(&self, edm: &Edm) -> Option<TargetType> {
        let mut current: Option<TargetType> = None;
        for segment in &self.segments {
            current = Some(match (segment, current.take()) {
                (PathSegment::EntitySet(name), None) => {
                    TargetType::entity(&edm.entity_set(name)?.entity_type, true)
                }
                (PathSegment::Key(_), Some(t)) if t.kind == TargetKind::Entity && t.collection => {
                    TargetType { collection: false, ..t }
                }
                (PathSegment::Navigation(name), Some(t))
                    if t.kind == TargetKind::Entity && !t.collection =>
                {
                    let nav = edm.entity_type(&t.type_name)?.navigation_property(name)?;
                    let type_ref = nav.type_ref();
                    TargetType::entity(&type_ref.name, type_ref.collection)
                }
                (PathSegment::Property(name), Some(t)) if !t.collection => {
                    let property = match t.kind {
                        TargetKind::Entity => edm.entity_type(&t.type_name)?.property(name)?,
                        TargetKind::Complex => edm.complex_type(&t.type_name)?.property(name)?,
                        TargetKind::Primitive => return None,
                    };
                    TargetType::from_type_ref(edm, &property.type_ref())?
                }
                (PathSegment::Count, Some(t)) if t.collection => {
                    TargetType::primitive(PrimitiveType::Int64)
                }
                (PathSegment::Value, Some(t))
                    if t.kind == TargetKind::Primitive && !t.collection =>
                {
                    t
                }
                (PathSegment::Operation(call), binding) => {
                    let operation = if call.bound {
                        let binding = binding?.type_ref();
                        edm.bound_operation(call.kind, &call.name, &binding)?
                    } else {
                        edm.imported_operation(call.kind, &call.name)?
                    };
                    TargetType::from_type_ref(edm, &operation.return_type_ref()?)?
                }
                _ => return None,
            });
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Entity,
    Complex,
    Primitive,
}

/// Type a resource path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    pub type_name: String,
    pub collection: bool,
    pub kind: TargetKind,
}

impl TargetType {
    pub fn entity(type_name: &str, collection: bool) -> Self {
        Self {
            type_name: type_name.to_string(),
            collection,
            kind: TargetKind::Entity,
        }
    }

    pub fn primitive(ty: PrimitiveType) -> Self {
        Self {
            type_name: ty.name().to_string(),
            collection: false,
            kind: TargetKind::Primitive,
        }
    }

    pub fn from_type_ref(edm: &Edm, type_ref: &TypeRef) -> Option<Self> {
        let kind = match edm.type_kind(&type_ref.name)? {
            TypeKind::Entity => TargetKind::Entity,
            TypeKind::Complex => TargetKind::Complex,
            TypeKind::Primitive(_) => TargetKind::Primitive,
        };
        Some(Self {
            type_name: type_ref.name.clone(),
            collection: type_ref.collection,
            kind,
        })
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef {
            name: self.type_name.clone(),
            collection: self.collection,
        }
    }
}

impl ODataUri {
    pub fn resource_path(&self) -> Option<&ResourcePath> {
        match &self.kind {
            UriKind::Resource(path) | UriKind::Ref(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self.kind, UriKind::Ref(_))
    }

    pub fn operation(&self) -> Option<&OperationCall> {
        match &self.kind {
            UriKind::Resource(path) => path.operation(),
            _ => None,
        }
    }

    pub fn target_type(&self, edm: &Edm) -> Option<TargetType> {
        self.resource_path()?.target_type(edm)
    }

    /// `true` when the path addresses a single entity (entity set plus key, or single-valued navigation).
    pub fn is_single_entity(&self, edm: &Edm) -> bool {
        matches!(
            self.target_type(edm),
            Some(TargetType { kind: TargetKind::Entity, collection: false, .. })
        )
    }

    pub fn is_entity_collection(&self, edm: &Edm) -> bool {
        matches!(
            self.target_type(edm),
            Some(TargetType { kind: TargetKind::Entity, collection: true, .. })
        )
    }
}
