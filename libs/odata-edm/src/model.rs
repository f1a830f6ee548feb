//! Entity data model: schemas, structured types, operations and the entity container.
//!
//! Models are declared as JSON documents (see [`EdmDocument`]) or assembled with
//! [`crate::EdmBuilder`], then frozen into an [`Edm`] which indexes every
//! definition by its namespace-qualified name and owns the structural accessors.

use crate::accessor::StructuralAccessors;
use crate::error::{EdmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Primitive types of the Edm namespace supported by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    SByte,
    Int16,
    Int32,
    Int64,
    Decimal,
    Double,
    Single,
    String,
    Guid,
    DateTimeOffset,
    Date,
    Binary,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 14] = [
        PrimitiveType::Boolean,
        PrimitiveType::Byte,
        PrimitiveType::SByte,
        PrimitiveType::Int16,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::Decimal,
        PrimitiveType::Double,
        PrimitiveType::Single,
        PrimitiveType::String,
        PrimitiveType::Guid,
        PrimitiveType::DateTimeOffset,
        PrimitiveType::Date,
        PrimitiveType::Binary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "Edm.Boolean",
            PrimitiveType::Byte => "Edm.Byte",
            PrimitiveType::SByte => "Edm.SByte",
            PrimitiveType::Int16 => "Edm.Int16",
            PrimitiveType::Int32 => "Edm.Int32",
            PrimitiveType::Int64 => "Edm.Int64",
            PrimitiveType::Decimal => "Edm.Decimal",
            PrimitiveType::Double => "Edm.Double",
            PrimitiveType::Single => "Edm.Single",
            PrimitiveType::String => "Edm.String",
            PrimitiveType::Guid => "Edm.Guid",
            PrimitiveType::DateTimeOffset => "Edm.DateTimeOffset",
            PrimitiveType::Date => "Edm.Date",
            PrimitiveType::Binary => "Edm.Binary",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            PrimitiveType::Byte
                | PrimitiveType::SByte
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral()
            || matches!(
                self,
                PrimitiveType::Decimal | PrimitiveType::Double | PrimitiveType::Single
            )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A type reference as written in the model, e.g. `Edm.String` or `Collection(Demo.Order)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub name: String,
    pub collection: bool,
}

impl TypeRef {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => Self {
                name: inner.trim().to_string(),
                collection: true,
            },
            None => Self {
                name: text.to_string(),
                collection: false,
            },
        }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: false,
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveType> {
        PrimitiveType::from_name(&self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection {
            write!(f, "Collection({})", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// What a qualified type name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Primitive(PrimitiveType),
    Complex,
    Entity,
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdmDocument {
    pub schemas: Vec<Schema>,
    pub container: EntityContainer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub namespace: String,
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    #[serde(default)]
    pub complex_types: Vec<ComplexType>,
    #[serde(default)]
    pub functions: Vec<OperationDef>,
    #[serde(default)]
    pub actions: Vec<OperationDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl Property {
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::parse(&self.type_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
}

impl NavigationProperty {
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::parse(&self.type_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub name: String,
    #[serde(skip)]
    pub namespace: String,
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub navigation_properties: Vec<NavigationProperty>,
}

impl EntityType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation_property(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexType {
    pub name: String,
    #[serde(skip)]
    pub namespace: String,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl ComplexType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Function,
    Action,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Function => f.write_str("function"),
            OperationKind::Action => f.write_str("action"),
        }
    }
}

/// A function or action. For bound operations the first parameter is the binding parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDef {
    pub name: String,
    #[serde(skip)]
    pub namespace: String,
    #[serde(skip, default = "default_operation_kind")]
    pub kind: OperationKind,
    #[serde(default)]
    pub is_bound: bool,
    #[serde(default)]
    pub parameters: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl OperationDef {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn binding_parameter(&self) -> Option<&Property> {
        if self.is_bound {
            self.parameters.first()
        } else {
            None
        }
    }

    /// Parameters the caller supplies (everything but the binding parameter).
    pub fn call_parameters(&self) -> &[Property] {
        if self.is_bound && !self.parameters.is_empty() {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }

    pub fn return_type_ref(&self) -> Option<TypeRef> {
        self.return_type.as_deref().map(TypeRef::parse)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContainer {
    pub name: String,
    #[serde(default)]
    pub entity_sets: Vec<EntitySet>,
    #[serde(default)]
    pub function_imports: Vec<OperationImport>,
    #[serde(default)]
    pub action_imports: Vec<OperationImport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationImport {
    pub name: String,
    /// Qualified name of the imported unbound operation.
    pub operation: String,
}

fn default_nullable() -> bool {
    true
}

fn default_operation_kind() -> OperationKind {
    OperationKind::Function
}

// ============================================================================
// Frozen model
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TypeSlot {
    Entity(usize),
    Complex(usize),
}

/// Validated and indexed entity data model.
#[derive(Debug)]
pub struct Edm {
    namespaces: Vec<String>,
    entity_types: Vec<EntityType>,
    complex_types: Vec<ComplexType>,
    functions: Vec<OperationDef>,
    actions: Vec<OperationDef>,
    container: EntityContainer,
    types: HashMap<String, TypeSlot>,
    sets: HashMap<String, usize>,
    accessors: StructuralAccessors,
}

impl Edm {
    pub fn new(document: EdmDocument) -> Result<Self> {
        let mut namespaces = Vec::new();
        let mut entity_types = Vec::new();
        let mut complex_types = Vec::new();
        let mut functions = Vec::new();
        let mut actions = Vec::new();
        let mut types = HashMap::new();

        for schema in document.schemas {
            if schema.namespace.is_empty() || schema.namespace == "Edm" {
                return Err(EdmError::InvalidModel(format!(
                    "invalid schema namespace '{}'",
                    schema.namespace
                )));
            }
            if namespaces.contains(&schema.namespace) {
                return Err(EdmError::Duplicate(schema.namespace));
            }

            for mut entity_type in schema.entity_types {
                entity_type.namespace = schema.namespace.clone();
                let qualified = entity_type.qualified_name();
                if types
                    .insert(qualified.clone(), TypeSlot::Entity(entity_types.len()))
                    .is_some()
                {
                    return Err(EdmError::Duplicate(qualified));
                }
                entity_types.push(entity_type);
            }
            for mut complex_type in schema.complex_types {
                complex_type.namespace = schema.namespace.clone();
                let qualified = complex_type.qualified_name();
                if types
                    .insert(qualified.clone(), TypeSlot::Complex(complex_types.len()))
                    .is_some()
                {
                    return Err(EdmError::Duplicate(qualified));
                }
                complex_types.push(complex_type);
            }
            for mut function in schema.functions {
                function.namespace = schema.namespace.clone();
                function.kind = OperationKind::Function;
                functions.push(function);
            }
            for mut action in schema.actions {
                action.namespace = schema.namespace.clone();
                action.kind = OperationKind::Action;
                actions.push(action);
            }
            namespaces.push(schema.namespace);
        }

        let mut sets = HashMap::new();
        for (idx, set) in document.container.entity_sets.iter().enumerate() {
            if sets.insert(set.name.clone(), idx).is_some() {
                return Err(EdmError::Duplicate(set.name.clone()));
            }
        }

        let accessors = StructuralAccessors::build(&entity_types, &complex_types)?;

        let edm = Self {
            namespaces,
            entity_types,
            complex_types,
            functions,
            actions,
            container: document.container,
            types,
            sets,
            accessors,
        };
        edm.validate()?;
        Ok(edm)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: EdmDocument =
            serde_json::from_str(json).map_err(|e| EdmError::Parse(e.to_string()))?;
        Self::new(document)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EdmError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        for entity_type in &self.entity_types {
            if entity_type.key.is_empty() {
                return Err(EdmError::InvalidModel(format!(
                    "entity type {} declares no key",
                    entity_type.qualified_name()
                )));
            }
            for key in &entity_type.key {
                let property = entity_type.property(key).ok_or_else(|| EdmError::MissingKey {
                    type_name: entity_type.qualified_name(),
                    property: key.clone(),
                })?;
                let type_ref = property.type_ref();
                if type_ref.collection || type_ref.primitive().is_none() {
                    return Err(EdmError::InvalidModel(format!(
                        "key property {}.{} must be a single primitive",
                        entity_type.qualified_name(),
                        key
                    )));
                }
            }
            for nav in &entity_type.navigation_properties {
                let target = nav.type_ref();
                if self.type_kind(&target.name) != Some(TypeKind::Entity) {
                    return Err(EdmError::UnknownType(target.name));
                }
            }
        }

        for set in &self.container.entity_sets {
            if self.entity_type(&set.entity_type).is_none() {
                return Err(EdmError::UnknownType(set.entity_type.clone()));
            }
        }

        let mut seen = HashSet::new();
        for operation in self.functions.iter().chain(self.actions.iter()) {
            if operation.is_bound && operation.parameters.is_empty() {
                return Err(EdmError::InvalidModel(format!(
                    "bound {} {} has no binding parameter",
                    operation.kind,
                    operation.qualified_name()
                )));
            }
            for parameter in &operation.parameters {
                let type_ref = parameter.type_ref();
                if self.type_kind(&type_ref.name).is_none() {
                    return Err(EdmError::UnknownType(type_ref.name));
                }
            }
            if let Some(ret) = operation.return_type_ref() {
                if self.type_kind(&ret.name).is_none() {
                    return Err(EdmError::UnknownType(ret.name));
                }
            }
            let binding = operation.binding_parameter().map(|p| p.type_name.clone());
            if !seen.insert((operation.qualified_name(), binding)) {
                return Err(EdmError::Duplicate(operation.qualified_name()));
            }
        }

        for import in &self.container.function_imports {
            if self
                .unbound_operation(OperationKind::Function, &import.operation)
                .is_none()
            {
                return Err(EdmError::UnknownType(import.operation.clone()));
            }
        }
        for import in &self.container.action_imports {
            if self
                .unbound_operation(OperationKind::Action, &import.operation)
                .is_none()
            {
                return Err(EdmError::UnknownType(import.operation.clone()));
            }
        }

        Ok(())
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn container(&self) -> &EntityContainer {
        &self.container
    }

    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    pub fn complex_types(&self) -> &[ComplexType] {
        &self.complex_types
    }

    pub fn functions(&self) -> &[OperationDef] {
        &self.functions
    }

    pub fn actions(&self) -> &[OperationDef] {
        &self.actions
    }

    pub fn accessors(&self) -> &StructuralAccessors {
        &self.accessors
    }

    pub fn type_kind(&self, name: &str) -> Option<TypeKind> {
        if let Some(primitive) = PrimitiveType::from_name(name) {
            return Some(TypeKind::Primitive(primitive));
        }
        match self.types.get(name)? {
            TypeSlot::Entity(_) => Some(TypeKind::Entity),
            TypeSlot::Complex(_) => Some(TypeKind::Complex),
        }
    }

    pub fn entity_type(&self, qualified_name: &str) -> Option<&EntityType> {
        match self.types.get(qualified_name)? {
            TypeSlot::Entity(idx) => self.entity_types.get(*idx),
            TypeSlot::Complex(_) => None,
        }
    }

    pub fn complex_type(&self, qualified_name: &str) -> Option<&ComplexType> {
        match self.types.get(qualified_name)? {
            TypeSlot::Complex(idx) => self.complex_types.get(*idx),
            TypeSlot::Entity(_) => None,
        }
    }

    pub fn entity_sets(&self) -> &[EntitySet] {
        &self.container.entity_sets
    }

    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.sets
            .get(name)
            .and_then(|idx| self.container.entity_sets.get(*idx))
    }

    /// First entity set whose entity type is `qualified_name`.
    pub fn entity_set_for_type(&self, qualified_name: &str) -> Option<&EntitySet> {
        self.container
            .entity_sets
            .iter()
            .find(|set| set.entity_type == qualified_name)
    }

    pub fn function_import(&self, name: &str) -> Option<&OperationImport> {
        self.container
            .function_imports
            .iter()
            .find(|import| import.name == name)
    }

    pub fn action_import(&self, name: &str) -> Option<&OperationImport> {
        self.container
            .action_imports
            .iter()
            .find(|import| import.name == name)
    }

    fn operations(&self, kind: OperationKind) -> &[OperationDef] {
        match kind {
            OperationKind::Function => &self.functions,
            OperationKind::Action => &self.actions,
        }
    }

    pub fn unbound_operation(&self, kind: OperationKind, qualified_name: &str) -> Option<&OperationDef> {
        self.operations(kind)
            .iter()
            .find(|op| !op.is_bound && op.qualified_name() == qualified_name)
    }

    /// Bound operation whose binding parameter accepts `binding`.
    pub fn bound_operation(
        &self,
        kind: OperationKind,
        qualified_name: &str,
        binding: &TypeRef,
    ) -> Option<&OperationDef> {
        self.operations(kind).iter().find(|op| {
            op.qualified_name() == qualified_name
                && op
                    .binding_parameter()
                    .map(|p| p.type_ref() == *binding)
                    .unwrap_or(false)
        })
    }

    /// Operation a container import points at.
    pub fn imported_operation(&self, kind: OperationKind, import_name: &str) -> Option<&OperationDef> {
        let import = match kind {
            OperationKind::Function => self.function_import(import_name)?,
            OperationKind::Action => self.action_import(import_name)?,
        };
        self.unbound_operation(kind, &import.operation)
    }
}
