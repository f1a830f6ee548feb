//! OData entity data model
//!
//! - [`Edm`]: validated schema with entity/complex types, operations and the entity container
//! - [`Entity`] / [`Value`]: data exchanged with data sources and wire formats
//! - [`StructuralAccessors`]: per-type descriptors for key extraction and validation
//! - [`uri`]: parsed resource URIs and their target types

pub mod accessor;
pub mod builder;
pub mod error;
pub mod model;
pub mod uri;
pub mod value;

pub use accessor::{format_key, PropertyKind, StructuralAccessors, TypeDescriptor};
pub use builder::EdmBuilder;
pub use error::{EdmError, Result, UriError};
pub use model::{
    ComplexType, Edm, EdmDocument, EntityContainer, EntitySet, EntityType, NavigationProperty,
    OperationDef, OperationImport, OperationKind, PrimitiveType, Property, Schema, TypeKind,
    TypeRef,
};
pub use uri::{
    parse_entity_reference, parse_literal, parse_uri, KeyValue, ODataUri, OperationCall,
    PathSegment, QueryOptions, ResourcePath, TargetKind, TargetType, UriKind,
};
pub use value::{ComplexValue, Entity, NavigationLink, PrimitiveValue, Value};
