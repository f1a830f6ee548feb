//! CSDL XML (`$metadata`) writer.

use crate::error::Result;
use oxidata_edm::{Edm, OperationDef, Property};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::io::Cursor;

pub const EDMX_NS: &str = "http://docs.oasis-open.org/odata/ns/edmx";
pub const EDM_NS: &str = "http://docs.oasis-open.org/odata/ns/edm";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

pub fn write_metadata(edm: &Edm) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut edmx = BytesStart::new("edmx:Edmx");
    edmx.push_attribute(("Version", "4.0"));
    edmx.push_attribute(("xmlns:edmx", EDMX_NS));
    writer.write_event(Event::Start(edmx))?;
    writer.write_event(Event::Start(BytesStart::new("edmx:DataServices")))?;

    for (idx, namespace) in edm.namespaces().iter().enumerate() {
        let mut schema = BytesStart::new("Schema");
        schema.push_attribute(("Namespace", namespace.as_str()));
        schema.push_attribute(("xmlns", EDM_NS));
        writer.write_event(Event::Start(schema))?;

        for entity_type in edm.entity_types().iter().filter(|t| &t.namespace == namespace) {
            let mut element = BytesStart::new("EntityType");
            element.push_attribute(("Name", entity_type.name.as_str()));
            writer.write_event(Event::Start(element))?;

            writer.write_event(Event::Start(BytesStart::new("Key")))?;
            for key in &entity_type.key {
                let mut property_ref = BytesStart::new("PropertyRef");
                property_ref.push_attribute(("Name", key.as_str()));
                writer.write_event(Event::Empty(property_ref))?;
            }
            writer.write_event(Event::End(BytesEnd::new("Key")))?;

            for property in &entity_type.properties {
                write_property(&mut writer, "Property", property)?;
            }
            for nav in &entity_type.navigation_properties {
                let mut element = BytesStart::new("NavigationProperty");
                element.push_attribute(("Name", nav.name.as_str()));
                element.push_attribute(("Type", nav.type_name.as_str()));
                if !nav.nullable && !nav.type_ref().collection {
                    element.push_attribute(("Nullable", "false"));
                }
                if let Some(partner) = &nav.partner {
                    element.push_attribute(("Partner", partner.as_str()));
                }
                writer.write_event(Event::Empty(element))?;
            }
            writer.write_event(Event::End(BytesEnd::new("EntityType")))?;
        }

        for complex_type in edm.complex_types().iter().filter(|t| &t.namespace == namespace) {
            let mut element = BytesStart::new("ComplexType");
            element.push_attribute(("Name", complex_type.name.as_str()));
            writer.write_event(Event::Start(element))?;
            for property in &complex_type.properties {
                write_property(&mut writer, "Property", property)?;
            }
            writer.write_event(Event::End(BytesEnd::new("ComplexType")))?;
        }

        for operation in edm
            .functions()
            .iter()
            .chain(edm.actions().iter())
            .filter(|op| &op.namespace == namespace)
        {
            write_operation(&mut writer, operation)?;
        }

        // The container lives in the first schema.
        if idx == 0 {
            write_container(&mut writer, edm)?;
        }

        writer.write_event(Event::End(BytesEnd::new("Schema")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("edmx:DataServices")))?;
    writer.write_event(Event::End(BytesEnd::new("edmx:Edmx")))?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

fn write_property(writer: &mut XmlWriter, tag: &str, property: &Property) -> Result<()> {
    let mut element = BytesStart::new(tag);
    element.push_attribute(("Name", property.name.as_str()));
    element.push_attribute(("Type", property.type_name.as_str()));
    if !property.nullable {
        element.push_attribute(("Nullable", "false"));
    }
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

fn write_operation(writer: &mut XmlWriter, operation: &OperationDef) -> Result<()> {
    let tag = match operation.kind {
        oxidata_edm::OperationKind::Function => "Function",
        oxidata_edm::OperationKind::Action => "Action",
    };
    let mut element = BytesStart::new(tag);
    element.push_attribute(("Name", operation.name.as_str()));
    if operation.is_bound {
        element.push_attribute(("IsBound", "true"));
    }
    writer.write_event(Event::Start(element))?;
    for parameter in &operation.parameters {
        write_property(writer, "Parameter", parameter)?;
    }
    if let Some(return_type) = &operation.return_type {
        let mut ret = BytesStart::new("ReturnType");
        ret.push_attribute(("Type", return_type.as_str()));
        writer.write_event(Event::Empty(ret))?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_container(writer: &mut XmlWriter, edm: &Edm) -> Result<()> {
    let container = edm.container();
    let mut element = BytesStart::new("EntityContainer");
    element.push_attribute(("Name", container.name.as_str()));
    writer.write_event(Event::Start(element))?;

    for set in &container.entity_sets {
        let mut element = BytesStart::new("EntitySet");
        element.push_attribute(("Name", set.name.as_str()));
        element.push_attribute(("EntityType", set.entity_type.as_str()));
        writer.write_event(Event::Empty(element))?;
    }
    for import in &container.function_imports {
        let mut element = BytesStart::new("FunctionImport");
        element.push_attribute(("Name", import.name.as_str()));
        element.push_attribute(("Function", import.operation.as_str()));
        element.push_attribute(("IncludeInServiceDocument", "true"));
        writer.write_event(Event::Empty(element))?;
    }
    for import in &container.action_imports {
        let mut element = BytesStart::new("ActionImport");
        element.push_attribute(("Name", import.name.as_str()));
        element.push_attribute(("Action", import.operation.as_str()));
        writer.write_event(Event::Empty(element))?;
    }

    writer.write_event(Event::End(BytesEnd::new("EntityContainer")))?;
    Ok(())
}
