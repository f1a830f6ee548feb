//! OData Atom/XML marshalling
//!
//! Writes entries, feeds, `<metadata:value>` documents, AtomPub service
//! documents and `<metadata:error>` documents with quick-xml; reads entries,
//! feeds and value documents back with roxmltree.

use crate::error::{FormatError, Result};
use crate::json::entity_id;
use oxidata_edm::{
    ComplexValue, Edm, Entity, NavigationLink, PrimitiveValue, TypeDescriptor, TypeKind, TypeRef,
    Value,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};
use std::io::Cursor;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const APP_NS: &str = "http://www.w3.org/2007/app";
pub const METADATA_NS: &str = "http://docs.oasis-open.org/odata/ns/metadata";
pub const DATA_NS: &str = "http://docs.oasis-open.org/odata/ns/data";
pub const SCHEME_NS: &str = "http://docs.oasis-open.org/odata/ns/scheme";
pub const RELATED_PREFIX: &str = "http://docs.oasis-open.org/odata/ns/related/";

const FEED_TYPE: &str = "application/atom+xml;type=feed";
const ENTRY_TYPE: &str = "application/atom+xml;type=entry";

// ============================================================================
// Writing
// ============================================================================

struct AtomWriter<'a> {
    edm: &'a Edm,
    service_root: &'a str,
    writer: Writer<Cursor<Vec<u8>>>,
}

impl<'a> AtomWriter<'a> {
    fn new(edm: &'a Edm, service_root: &'a str) -> Result<Self> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        Ok(Self {
            edm,
            service_root: service_root.trim_end_matches('/'),
            writer,
        })
    }

    fn finish(self) -> Result<String> {
        Ok(String::from_utf8(self.writer.into_inner().into_inner())?)
    }

    fn start(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.writer.write_event(Event::Empty(element))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(BytesStart::new(name))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn root_namespaces(&self, element: &mut BytesStart<'_>) {
        element.push_attribute(("xmlns", ATOM_NS));
        element.push_attribute(("xmlns:data", DATA_NS));
        element.push_attribute(("xmlns:metadata", METADATA_NS));
        element.push_attribute(("xml:base", format!("{}/", self.service_root).as_str()));
    }

    fn write_common_metadata(&mut self) -> Result<()> {
        self.empty(BytesStart::new("title"))?;
        self.text_element("updated", &chrono::Utc::now().to_rfc3339())?;
        self.start(BytesStart::new("author"))?;
        self.empty(BytesStart::new("name"))?;
        self.end("author")
    }

    fn write_entry(&mut self, entity: &Entity, root: bool, context: Option<&str>) -> Result<()> {
        let descriptor = descriptor(self.edm, &entity.type_name)?;
        let id = entity_id(self.edm, entity, self.service_root);
        let edit = id
            .as_deref()
            .and_then(|id| id.strip_prefix(self.service_root))
            .map(|rel| rel.trim_start_matches('/').to_string());

        let mut start = BytesStart::new("entry");
        if root {
            self.root_namespaces(&mut start);
        }
        if let Some(context) = context {
            start.push_attribute(("metadata:context", context));
        }
        self.start(start)?;

        self.text_element("id", id.as_deref().unwrap_or(""))?;
        let mut category = BytesStart::new("category");
        category.push_attribute(("scheme", SCHEME_NS));
        category.push_attribute(("term", format!("#{}", entity.type_name).as_str()));
        self.empty(category)?;

        if let Some(edit) = &edit {
            let mut link = BytesStart::new("link");
            link.push_attribute(("rel", "edit"));
            link.push_attribute(("href", edit.as_str()));
            self.empty(link)?;
        }

        for nav in &descriptor.navigation {
            let rel = format!("{}{}", RELATED_PREFIX, nav.name);
            let mut link = BytesStart::new("link");
            link.push_attribute(("rel", rel.as_str()));
            link.push_attribute(("type", if nav.collection { FEED_TYPE } else { ENTRY_TYPE }));
            link.push_attribute(("title", nav.name.as_str()));
            if let Some(edit) = &edit {
                link.push_attribute(("href", format!("{}/{}", edit, nav.name).as_str()));
            }

            match entity.links.get(&nav.name) {
                None => self.empty(link)?,
                Some(target) => {
                    self.start(link)?;
                    self.start(BytesStart::new("metadata:inline"))?;
                    match target {
                        NavigationLink::Single(None) => {}
                        NavigationLink::Single(Some(inner)) => self.write_entry(inner, false, None)?,
                        NavigationLink::Many(items) => self.write_feed(items, None, None, false, None)?,
                    }
                    self.end("metadata:inline")?;
                    self.end("link")?;
                }
            }
        }

        self.write_common_metadata()?;

        let mut content = BytesStart::new("content");
        content.push_attribute(("type", "application/xml"));
        self.start(content)?;
        self.start(BytesStart::new("metadata:properties"))?;
        self.write_properties(descriptor, &entity.properties)?;
        self.end("metadata:properties")?;
        self.end("content")?;

        self.end("entry")
    }

    fn write_feed(
        &mut self,
        entities: &[Entity],
        id: Option<&str>,
        count: Option<usize>,
        root: bool,
        context: Option<&str>,
    ) -> Result<()> {
        let mut start = BytesStart::new("feed");
        if root {
            self.root_namespaces(&mut start);
        }
        if let Some(context) = context {
            start.push_attribute(("metadata:context", context));
        }
        self.start(start)?;
        self.text_element("id", id.unwrap_or(""))?;
        if let Some(count) = count {
            self.text_element("metadata:count", &count.to_string())?;
        }
        self.empty(BytesStart::new("title"))?;
        self.text_element("updated", &chrono::Utc::now().to_rfc3339())?;
        for entity in entities {
            self.write_entry(entity, false, None)?;
        }
        self.end("feed")
    }

    fn write_properties(
        &mut self,
        descriptor: &TypeDescriptor,
        properties: &std::collections::BTreeMap<String, Value>,
    ) -> Result<()> {
        for name in properties.keys() {
            if descriptor.property(name).is_none() {
                return Err(FormatError::UnknownProperty {
                    type_name: descriptor.qualified_name.clone(),
                    property: name.clone(),
                });
            }
        }
        for property in &descriptor.properties {
            if let Some(value) = properties.get(&property.name) {
                let tag = format!("data:{}", property.name);
                self.write_value(&tag, value, &property.type_ref, &[])?;
            }
        }
        Ok(())
    }

    fn write_value(
        &mut self,
        tag: &str,
        value: &Value,
        type_ref: &TypeRef,
        extra: &[(&str, &str)],
    ) -> Result<()> {
        let mut element = BytesStart::new(tag);
        for attribute in extra {
            element.push_attribute(*attribute);
        }
        match value {
            Value::Null => {
                element.push_attribute(("metadata:null", "true"));
                self.empty(element)
            }
            Value::Primitive(primitive) => {
                let ty = primitive.primitive_type();
                if ty != oxidata_edm::PrimitiveType::String {
                    element.push_attribute(("metadata:type", short_type_name(ty.name())));
                }
                self.start(element)?;
                self.writer
                    .write_event(Event::Text(BytesText::new(&primitive.to_text())))?;
                self.end(tag)
            }
            Value::Complex(complex) => {
                element.push_attribute(("metadata:type", format!("#{}", complex.type_name).as_str()));
                self.start(element)?;
                let descriptor = descriptor(self.edm, &complex.type_name)?;
                self.write_properties(descriptor, &complex.properties)?;
                self.end(tag)
            }
            Value::Collection(items) => {
                let annotation = format!("#Collection({})", short_type_name(&type_ref.name));
                element.push_attribute(("metadata:type", annotation.as_str()));
                self.start(element)?;
                let item_ref = TypeRef::single(type_ref.name.clone());
                for item in items {
                    self.write_value("metadata:element", item, &item_ref, &[])?;
                }
                self.end(tag)
            }
        }
    }
}

fn short_type_name(name: &str) -> &str {
    name.strip_prefix("Edm.").unwrap_or(name)
}

fn descriptor<'a>(edm: &'a Edm, type_name: &str) -> Result<&'a TypeDescriptor> {
    edm.accessors()
        .get(type_name)
        .ok_or_else(|| FormatError::UnknownType(type_name.to_string()))
}

pub fn write_entry_document(
    edm: &Edm,
    entity: &Entity,
    service_root: &str,
    context: Option<&str>,
) -> Result<String> {
    let mut writer = AtomWriter::new(edm, service_root)?;
    writer.write_entry(entity, true, context)?;
    writer.finish()
}

pub fn write_feed_document(
    edm: &Edm,
    entities: &[Entity],
    service_root: &str,
    feed_id: &str,
    count: Option<usize>,
    context: Option<&str>,
) -> Result<String> {
    let mut writer = AtomWriter::new(edm, service_root)?;
    writer.write_feed(entities, Some(feed_id), count, true, context)?;
    writer.finish()
}

/// `<metadata:value>` document for a primitive, complex or collection value.
pub fn write_value_document(
    edm: &Edm,
    value: &Value,
    type_ref: &TypeRef,
    context: Option<&str>,
) -> Result<String> {
    let mut writer = AtomWriter::new(edm, "")?;
    let mut attributes = vec![("xmlns:metadata", METADATA_NS), ("xmlns:data", DATA_NS)];
    if let Some(context) = context {
        attributes.push(("metadata:context", context));
    }
    writer.write_value("metadata:value", value, type_ref, &attributes)?;
    writer.finish()
}

pub fn write_service_document(edm: &Edm, service_root: &str) -> Result<String> {
    let mut writer = AtomWriter::new(edm, service_root)?;
    let root = writer.service_root.to_string();
    let context = format!("{}/$metadata", root);

    let mut service = BytesStart::new("app:service");
    service.push_attribute(("xmlns:app", APP_NS));
    service.push_attribute(("xmlns:atom", ATOM_NS));
    service.push_attribute(("xmlns:metadata", METADATA_NS));
    service.push_attribute(("xml:base", format!("{}/", root).as_str()));
    service.push_attribute(("metadata:context", context.as_str()));
    writer.start(service)?;
    writer.start(BytesStart::new("app:workspace"))?;
    writer.text_element("atom:title", &edm.container().name)?;

    for set in edm.entity_sets() {
        let mut collection = BytesStart::new("app:collection");
        collection.push_attribute(("href", set.name.as_str()));
        writer.start(collection)?;
        writer.text_element("atom:title", &set.name)?;
        writer.end("app:collection")?;
    }
    for import in &edm.container().function_imports {
        let mut element = BytesStart::new("metadata:function-import");
        element.push_attribute(("href", import.name.as_str()));
        element.push_attribute(("metadata:name", import.name.as_str()));
        writer.start(element)?;
        writer.text_element("atom:title", &import.name)?;
        writer.end("metadata:function-import")?;
    }

    writer.end("app:workspace")?;
    writer.end("app:service")?;
    writer.finish()
}

pub fn write_error(code: &str, message: &str, target: Option<&str>) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    let mut root = BytesStart::new("metadata:error");
    root.push_attribute(("xmlns:metadata", METADATA_NS));
    writer.write_event(Event::Start(root))?;
    let mut fields = vec![("metadata:code", code), ("metadata:message", message)];
    if let Some(target) = target {
        fields.push(("metadata:target", target));
    }
    for (name, text) in fields {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    writer.write_event(Event::End(BytesEnd::new("metadata:error")))?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

// ============================================================================
// Reading
// ============================================================================

/// Reads an `<entry>` document. `expected_type` is used when the entry carries no category.
pub fn read_entry(edm: &Edm, xml: &str, expected_type: Option<&str>) -> Result<Entity> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name((ATOM_NS, "entry")) {
        return Err(FormatError::MissingElement("entry".to_string()));
    }
    read_entry_node(edm, root, expected_type)
}

pub fn read_feed(edm: &Edm, xml: &str, expected_type: Option<&str>) -> Result<Vec<Entity>> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name((ATOM_NS, "feed")) {
        return Err(FormatError::MissingElement("feed".to_string()));
    }
    read_feed_node(edm, root, expected_type)
}

pub fn read_value_document(edm: &Edm, type_ref: &TypeRef, xml: &str) -> Result<Value> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name((METADATA_NS, "value")) {
        return Err(FormatError::MissingElement("metadata:value".to_string()));
    }
    read_value_node(edm, root, type_ref)
}

/// Reads the `id` of a `<metadata:ref>` document.
pub fn read_reference(xml: &str) -> Result<String> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name((METADATA_NS, "ref")) {
        return Err(FormatError::MissingElement("metadata:ref".to_string()));
    }
    root.attribute("id")
        .map(str::to_string)
        .ok_or_else(|| FormatError::UnexpectedShape {
            name: "metadata:ref".to_string(),
            expected: "an id attribute".to_string(),
        })
}

fn read_feed_node(edm: &Edm, feed: Node<'_, '_>, expected_type: Option<&str>) -> Result<Vec<Entity>> {
    feed.children()
        .filter(|child| child.has_tag_name((ATOM_NS, "entry")))
        .map(|entry| read_entry_node(edm, entry, expected_type))
        .collect()
}

fn child<'a, 'input>(node: Node<'a, 'input>, ns: &str, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.has_tag_name((ns, name)))
}

fn read_entry_node(edm: &Edm, entry: Node<'_, '_>, expected_type: Option<&str>) -> Result<Entity> {
    let category = child(entry, ATOM_NS, "category")
        .and_then(|c| c.attribute("term"))
        .map(|term| term.trim_start_matches('#').to_string());
    let type_name = category
        .or_else(|| expected_type.map(str::to_string))
        .ok_or_else(|| FormatError::MissingElement("category".to_string()))?;
    if edm.type_kind(&type_name) != Some(TypeKind::Entity) {
        return Err(FormatError::UnknownType(type_name));
    }
    let descriptor = descriptor(edm, &type_name)?;
    let mut entity = Entity::new(type_name.clone());

    if let Some(properties) =
        child(entry, ATOM_NS, "content").and_then(|c| child(c, METADATA_NS, "properties"))
    {
        for element in properties.children().filter(Node::is_element) {
            let name = element.tag_name().name();
            let property = descriptor
                .property(name)
                .ok_or_else(|| FormatError::UnknownProperty {
                    type_name: type_name.clone(),
                    property: name.to_string(),
                })?;
            entity.properties.insert(
                name.to_string(),
                read_value_node(edm, element, &property.type_ref)?,
            );
        }
    }

    for link in entry.children().filter(|c| c.has_tag_name((ATOM_NS, "link"))) {
        let Some(name) = link.attribute("rel").and_then(|rel| rel.strip_prefix(RELATED_PREFIX)) else {
            continue;
        };
        let Some(inline) = child(link, METADATA_NS, "inline") else {
            continue;
        };
        let nav = descriptor
            .navigation(name)
            .ok_or_else(|| FormatError::UnknownProperty {
                type_name: type_name.clone(),
                property: name.to_string(),
            })?;
        let value = if nav.collection {
            match child(inline, ATOM_NS, "feed") {
                Some(feed) => NavigationLink::Many(read_feed_node(edm, feed, Some(&nav.target))?),
                None => NavigationLink::Many(Vec::new()),
            }
        } else {
            match child(inline, ATOM_NS, "entry") {
                Some(inner) => NavigationLink::Single(Some(Box::new(read_entry_node(
                    edm,
                    inner,
                    Some(&nav.target),
                )?))),
                None => NavigationLink::Single(None),
            }
        };
        entity.links.insert(name.to_string(), value);
    }

    Ok(entity)
}

fn read_value_node(edm: &Edm, node: Node<'_, '_>, type_ref: &TypeRef) -> Result<Value> {
    if node.attribute((METADATA_NS, "null")) == Some("true") {
        return Ok(Value::Null);
    }
    if type_ref.collection {
        let item_ref = TypeRef::single(type_ref.name.clone());
        return Ok(Value::Collection(
            node.children()
                .filter(|c| c.has_tag_name((METADATA_NS, "element")))
                .map(|item| read_value_node(edm, item, &item_ref))
                .collect::<Result<_>>()?,
        ));
    }

    match edm.type_kind(&type_ref.name) {
        Some(TypeKind::Primitive(ty)) => Ok(Value::Primitive(PrimitiveValue::parse_text(
            ty,
            node.text().unwrap_or(""),
        )?)),
        Some(TypeKind::Complex) => {
            let descriptor = descriptor(edm, &type_ref.name)?;
            let mut complex = ComplexValue::new(type_ref.name.clone());
            for element in node.children().filter(Node::is_element) {
                let name = element.tag_name().name();
                let property = descriptor
                    .property(name)
                    .ok_or_else(|| FormatError::UnknownProperty {
                        type_name: type_ref.name.clone(),
                        property: name.to_string(),
                    })?;
                complex.properties.insert(
                    name.to_string(),
                    read_value_node(edm, element, &property.type_ref)?,
                );
            }
            Ok(Value::Complex(complex))
        }
        _ => Err(FormatError::UnknownType(type_ref.name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_model;

    #[test]
    fn test_reference_reads_id_attribute() {
        let xml = format!(r#"<metadata:ref xmlns:metadata="{METADATA_NS}" id="http://host/svc/Orders(3)"/>"#);
        assert_eq!(read_reference(&xml).unwrap(), "http://host/svc/Orders(3)");
    }

    #[test]
    fn test_entry_round_trip() {
        let edm = test_model::edm();
        let entity = test_model::customer();

        let xml = write_entry_document(&edm, &entity, "http://host/svc", None).unwrap();
        assert!(xml.contains("<id>http://host/svc/Customers(1)</id>"));
        assert!(xml.contains(r##"term="#Demo.Customer""##));

        let back = read_entry(&edm, &xml, None).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_feed_round_trip_with_count() {
        let edm = test_model::edm();
        let entities = vec![test_model::customer(), test_model::customer_without_orders(2)];
        let xml = write_feed_document(
            &edm,
            &entities,
            "http://host/svc",
            "http://host/svc/Customers",
            Some(2),
            None,
        )
        .unwrap();
        assert!(xml.contains("<metadata:count>2</metadata:count>"));

        let back = read_feed(&edm, &xml, Some("Demo.Customer")).unwrap();
        assert_eq!(back, entities);
    }

    #[test]
    fn test_value_document_collection() {
        let edm = test_model::edm();
        let value = Value::from(vec!["a", "b"]);
        let type_ref = TypeRef::parse("Collection(Edm.String)");
        let xml = write_value_document(&edm, &value, &type_ref, None).unwrap();
        assert!(xml.contains(r##"metadata:type="#Collection(String)""##));
        assert_eq!(read_value_document(&edm, &type_ref, &xml).unwrap(), value);
    }

    #[test]
    fn test_error_document_escapes_text() {
        let xml = write_error("ODATA_BAD_REQUEST", "a < b", Some("Name")).unwrap();
        assert!(xml.contains("<metadata:message>a &lt; b</metadata:message>"));
        assert!(xml.contains("<metadata:target>Name</metadata:target>"));
    }

    #[test]
    fn test_service_document_lists_sets() {
        let edm = test_model::edm();
        let xml = write_service_document(&edm, "http://host/svc").unwrap();
        assert!(xml.contains(r#"<app:collection href="Customers">"#));
        assert!(xml.contains(r#"<app:collection href="Orders">"#));
    }
}
