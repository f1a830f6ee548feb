//! Programmatic model construction

use crate::error::Result;
use crate::model::{
    ComplexType, Edm, EdmDocument, EntityContainer, EntitySet, EntityType, NavigationProperty,
    OperationDef, OperationImport, OperationKind, Property, Schema,
};

/// Assembles a single-schema model.
///
/// ```
/// use oxidata_edm::{EdmBuilder, EntitySet, EntityType, Property};
///
/// let edm = EdmBuilder::new("Demo", "DemoService")
///     .entity_type(
///         EntityType::new("Tag", &["Id"])
///             .with_property(Property::new("Id", "Edm.Int32").required()),
///     )
///     .entity_set(EntitySet::new("Tags", "Demo.Tag"))
///     .build()
///     .unwrap();
/// assert!(edm.entity_set("Tags").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct EdmBuilder {
    schema: Schema,
    container: EntityContainer,
}

impl EdmBuilder {
    pub fn new(namespace: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            schema: Schema {
                namespace: namespace.into(),
                ..Default::default()
            },
            container: EntityContainer {
                name: container.into(),
                ..Default::default()
            },
        }
    }

    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.schema.entity_types.push(entity_type);
        self
    }

    pub fn complex_type(mut self, complex_type: ComplexType) -> Self {
        self.schema.complex_types.push(complex_type);
        self
    }

    pub fn operation(mut self, operation: OperationDef) -> Self {
        match operation.kind {
            OperationKind::Function => self.schema.functions.push(operation),
            OperationKind::Action => self.schema.actions.push(operation),
        }
        self
    }

    pub fn entity_set(mut self, set: EntitySet) -> Self {
        self.container.entity_sets.push(set);
        self
    }

    pub fn function_import(mut self, import: OperationImport) -> Self {
        self.container.function_imports.push(import);
        self
    }

    pub fn action_import(mut self, import: OperationImport) -> Self {
        self.container.action_imports.push(import);
        self
    }

    pub fn into_document(self) -> EdmDocument {
        EdmDocument {
            schemas: vec![self.schema],
            container: self.container,
        }
    }

    pub fn build(self) -> Result<Edm> {
        Edm::new(self.into_document())
    }
}

impl Property {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl NavigationProperty {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            partner: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }
}

impl EntityType {
    pub fn new(name: impl Into<String>, key: &[&str]) -> Self {
        Self {
            name: name.into(),
            key: key.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_navigation(mut self, navigation: NavigationProperty) -> Self {
        self.navigation_properties.push(navigation);
        self
    }
}

impl ComplexType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }
}

impl OperationDef {
    fn new(kind: OperationKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            kind,
            is_bound: false,
            parameters: Vec::new(),
            return_type: None,
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Function, name)
    }

    pub fn action(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Action, name)
    }

    /// Binds the operation to `type_name`; the binding parameter becomes the first parameter.
    pub fn bound_to(mut self, type_name: impl Into<String>) -> Self {
        self.is_bound = true;
        self.parameters
            .insert(0, Property::new("bindingParameter", type_name).required());
        self
    }

    pub fn with_parameter(mut self, parameter: Property) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = Some(type_name.into());
        self
    }
}

impl EntitySet {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

impl OperationImport {
    pub fn new(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
        }
    }
}
