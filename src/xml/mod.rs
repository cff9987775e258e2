//! A small namespace-aware document model on top of `quick-xml` events.
//!
//! Only what signature verification and metadata extraction need: elements,
//! attributes, text and processing instructions. Comments are dropped.
//! Documents carrying a DTD are refused outright, so no entity is ever
//! expanded and no external resource is ever resolved.

use std::collections::BTreeMap;

use derive_more::{Display, Error};
use quick_xml::events::{BytesPI, BytesStart, Event};
use quick_xml::Reader;

use crate::error::MetadataParseError;

pub mod c14n;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
	#[display("Document type declarations are not allowed")]
	DtdForbidden,
	#[display("{message}")]
	Malformed { message: String },
}

impl XmlError {
	fn malformed(message: impl ToString) -> Self {
		Self::Malformed {
			message: message.to_string(),
		}
	}
}

impl From<XmlError> for MetadataParseError {
	fn from(error: XmlError) -> Self {
		match error {
			XmlError::DtdForbidden => Self::DtdForbidden,
			XmlError::Malformed { message } => Self::MalformedXml { message },
		}
	}
}

/// In-scope namespace bindings, the default namespace is keyed by `""`
pub type NamespaceScope = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Element(Element),
	Text(String),
	ProcessingInstruction(ProcessingInstruction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingInstruction {
	pub target: String,
	pub data: String,
}

impl ProcessingInstruction {
	fn read(pi: &BytesPI<'_>) -> Result<Self, XmlError> {
		Ok(Self {
			target: utf8(pi.target())?.to_string(),
			data: utf8(pi.content())?.trim_start().to_string(),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
	pub prefix: Option<String>,
	pub local_name: String,
	pub namespace: Option<String>,
	pub value: String,
}

impl Attribute {
	#[must_use]
	pub fn qualified_name(&self) -> String {
		qualified_name(self.prefix.as_deref(), &self.local_name)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
	prefix: Option<String>,
	local_name: String,
	namespace: Option<String>,
	attributes: Vec<Attribute>,
	in_scope: NamespaceScope,
	children: Vec<Node>,
}

impl Element {
	fn open(start: &BytesStart<'_>, parent_scope: Option<&NamespaceScope>) -> Result<Self, XmlError> {
		let mut in_scope = parent_scope.cloned().unwrap_or_default();
		let mut raw_attributes = Vec::new();

		for attribute in start.attributes() {
			let attribute = attribute.map_err(XmlError::malformed)?;
			let key = utf8(attribute.key.as_ref())?.to_string();
			let value = normalize_attribute_value(utf8(&attribute.value)?)?;

			if key == "xmlns" {
				if value.is_empty() {
					in_scope.remove("");
				} else {
					in_scope.insert(String::new(), value);
				}
			} else if let Some(prefix) = key.strip_prefix("xmlns:") {
				if value.is_empty() {
					return Err(XmlError::malformed(format!("Prefix {prefix} cannot be undeclared")));
				}
				in_scope.insert(prefix.to_string(), value);
			} else {
				raw_attributes.push((key, value));
			}
		}

		let (prefix, local_name) = split_qualified_name(utf8(start.name().as_ref())?);
		let namespace = match &prefix {
			Some(prefix) => Some(resolve_prefix(&in_scope, prefix)?),
			None => in_scope.get("").cloned(),
		};

		let attributes = raw_attributes
			.into_iter()
			.map(|(key, value)| {
				let (prefix, local_name) = split_qualified_name(&key);
				let namespace = prefix
					.as_deref()
					.map(|prefix| resolve_prefix(&in_scope, prefix))
					.transpose()?;

				Ok(Attribute {
					prefix,
					local_name,
					namespace,
					value,
				})
			})
			.collect::<Result<Vec<_>, XmlError>>()?;

		Ok(Self {
			prefix,
			local_name,
			namespace,
			attributes,
			in_scope,
			children: Vec::new(),
		})
	}

	fn push_text(&mut self, text: &str) {
		if let Some(Node::Text(last)) = self.children.last_mut() {
			last.push_str(text);
		} else {
			self.children.push(Node::Text(text.to_string()));
		}
	}

	#[must_use]
	pub fn is(&self, namespace: &str, local_name: &str) -> bool {
		self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
	}

	#[must_use]
	pub fn prefix(&self) -> Option<&str> {
		self.prefix.as_deref()
	}

	#[must_use]
	pub fn local_name(&self) -> &str {
		&self.local_name
	}

	#[must_use]
	pub fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}

	#[must_use]
	pub fn qualified_name(&self) -> String {
		qualified_name(self.prefix.as_deref(), &self.local_name)
	}

	#[must_use]
	pub fn attributes(&self) -> &[Attribute] {
		&self.attributes
	}

	#[must_use]
	pub const fn in_scope(&self) -> &NamespaceScope {
		&self.in_scope
	}

	#[must_use]
	pub fn children(&self) -> &[Node] {
		&self.children
	}

	/// Value of an attribute that has no namespace, the way SAML attributes are written
	#[must_use]
	pub fn attribute(&self, local_name: &str) -> Option<&str> {
		self.attributes
			.iter()
			.find(|attribute| attribute.namespace.is_none() && attribute.local_name == local_name)
			.map(|attribute| attribute.value.as_str())
	}

	pub fn child_elements(&self) -> impl Iterator<Item = &Self> {
		self.children.iter().filter_map(|node| match node {
			Node::Element(element) => Some(element),
			Node::Text(_) | Node::ProcessingInstruction(_) => None,
		})
	}

	pub fn children_named<'s, 'n>(
		&'s self,
		namespace: &'n str,
		local_name: &'n str,
	) -> impl Iterator<Item = &'s Self> + 'n
	where
		's: 'n,
	{
		self.child_elements()
			.filter(move |element| element.is(namespace, local_name))
	}

	#[must_use]
	pub fn child(&self, namespace: &str, local_name: &str) -> Option<&Self> {
		self.child_elements()
			.find(|element| element.is(namespace, local_name))
	}

	/// Concatenated text of the direct children
	#[must_use]
	pub fn text(&self) -> String {
		self.children
			.iter()
			.filter_map(|node| match node {
				Node::Text(text) => Some(text.as_str()),
				Node::Element(_) | Node::ProcessingInstruction(_) => None,
			})
			.collect()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
	before_root: Vec<ProcessingInstruction>,
	root: Element,
	after_root: Vec<ProcessingInstruction>,
}

impl Document {
	pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
		let mut reader = Reader::from_reader(bytes);
		let mut buf = Vec::new();
		let mut stack: Vec<Element> = Vec::new();
		let mut root = None;
		let mut before_root = Vec::new();
		let mut after_root = Vec::new();

		loop {
			let event = reader
				.read_event_into(&mut buf)
				.map_err(|e| XmlError::malformed(format!("Error at position {}: {e}", reader.buffer_position())))?;

			match event {
				Event::DocType(_) => return Err(XmlError::DtdForbidden),
				Event::Start(start) => {
					if root.is_some() {
						return Err(XmlError::malformed("More than one root element"));
					}
					let element = Element::open(&start, stack.last().map(Element::in_scope))?;
					stack.push(element);
				},
				Event::Empty(start) => {
					let element = Element::open(&start, stack.last().map(Element::in_scope))?;
					attach(&mut stack, &mut root, element)?;
				},
				Event::End(_) => {
					let element = stack
						.pop()
						.ok_or_else(|| XmlError::malformed("Unexpected closing tag"))?;
					attach(&mut stack, &mut root, element)?;
				},
				Event::Text(text) => {
					let raw = utf8(&text)?.replace("\r\n", "\n").replace('\r', "\n");
					let unescaped = quick_xml::escape::unescape(&raw).map_err(XmlError::malformed)?;
					match stack.last_mut() {
						Some(parent) => parent.push_text(&unescaped),
						None if unescaped.trim().is_empty() => {},
						None => return Err(XmlError::malformed("Text outside of the root element")),
					}
				},
				Event::CData(data) => {
					let text = utf8(&data)?.replace("\r\n", "\n");
					stack
						.last_mut()
						.ok_or_else(|| XmlError::malformed("CDATA outside of the root element"))?
						.push_text(&text);
				},
				Event::PI(pi) => {
					let pi = ProcessingInstruction::read(&pi)?;
					match stack.last_mut() {
						Some(parent) => parent.children.push(Node::ProcessingInstruction(pi)),
						None if root.is_none() => before_root.push(pi),
						None => after_root.push(pi),
					}
				},
				Event::Eof => break,
				Event::Comment(_) | Event::Decl(_) => {},
			}
			buf.clear();
		}

		if !stack.is_empty() {
			return Err(XmlError::malformed("Unexpected end of document"));
		}

		let root = root.ok_or_else(|| XmlError::malformed("Document has no root element"))?;

		Ok(Self {
			before_root,
			root,
			after_root,
		})
	}

	#[must_use]
	pub const fn root(&self) -> &Element {
		&self.root
	}

	/// Processing instructions outside the document element, in document order
	#[must_use]
	pub fn before_root(&self) -> &[ProcessingInstruction] {
		&self.before_root
	}

	#[must_use]
	pub fn after_root(&self) -> &[ProcessingInstruction] {
		&self.after_root
	}
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), XmlError> {
	if let Some(parent) = stack.last_mut() {
		parent.children.push(Node::Element(element));
	} else if root.is_some() {
		return Err(XmlError::malformed("More than one root element"));
	} else {
		*root = Some(element);
	}
	Ok(())
}

fn utf8(bytes: &[u8]) -> Result<&str, XmlError> {
	std::str::from_utf8(bytes).map_err(XmlError::malformed)
}

/// Literal whitespace in attribute values becomes a space, character references are kept
fn normalize_attribute_value(raw: &str) -> Result<String, XmlError> {
	let normalized = raw.replace("\r\n", " ").replace(['\r', '\n', '\t'], " ");
	quick_xml::escape::unescape(&normalized)
		.map(|value| value.into_owned())
		.map_err(XmlError::malformed)
}

fn split_qualified_name(name: &str) -> (Option<String>, String) {
	match name.split_once(':') {
		Some((prefix, local_name)) => (Some(prefix.to_string()), local_name.to_string()),
		None => (None, name.to_string()),
	}
}

fn qualified_name(prefix: Option<&str>, local_name: &str) -> String {
	match prefix {
		Some(prefix) => format!("{prefix}:{local_name}"),
		None => local_name.to_string(),
	}
}

fn resolve_prefix(scope: &NamespaceScope, prefix: &str) -> Result<String, XmlError> {
	if prefix == "xml" {
		return Ok(XML_NS.to_string());
	}

	scope
		.get(prefix)
		.cloned()
		.ok_or_else(|| XmlError::malformed(format!("Undeclared namespace prefix {prefix}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_namespaces_are_resolved() {
		let xml = br#"<md:EntityDescriptor xmlns:md="urn:md" xmlns="urn:default" entityID="e">
			<md:Child a="1" md:b="2"><Inner/></md:Child>
			<Other xmlns=""/>
		</md:EntityDescriptor>"#;
		let document = Document::parse(xml).unwrap();
		let root = document.root();

		assert!(root.is("urn:md", "EntityDescriptor"));
		assert_eq!(root.attribute("entityID"), Some("e"));

		let child = root.child("urn:md", "Child").unwrap();
		assert_eq!(child.attribute("a"), Some("1"));
		assert_eq!(child.attribute("b"), None);
		assert_eq!(child.attributes()[1].namespace.as_deref(), Some("urn:md"));
		assert!(child.child("urn:default", "Inner").is_some());

		let other = root.child_elements().nth(1).unwrap();
		assert_eq!(other.local_name(), "Other");
		assert_eq!(other.namespace(), None);
	}

	#[test]
	fn test_text_is_unescaped_and_merged() {
		let document = Document::parse(b"<a>x &amp; y<![CDATA[ <z> ]]>&#65;</a>").unwrap();
		assert_eq!(document.root().text(), "x & y <z> A");
	}

	#[test]
	fn test_processing_instructions_are_kept() {
		let xml = br#"<?xml version="1.0"?>
<?before one?>
<root><?inside  spaced data?><child/></root>
<!-- dropped -->
<?after?>"#;
		let document = Document::parse(xml).unwrap();

		assert_eq!(
			document.before_root(),
			[ProcessingInstruction {
				target: "before".to_string(),
				data: "one".to_string(),
			}]
		);
		assert_eq!(
			document.root().children()[0],
			Node::ProcessingInstruction(ProcessingInstruction {
				target: "inside".to_string(),
				data: "spaced data".to_string(),
			})
		);
		assert_eq!(document.after_root()[0].target, "after");
		assert_eq!(document.after_root()[0].data, "");
		assert_eq!(document.root().child_elements().count(), 1);
	}

	#[test]
	fn test_child_lookup_with_borrowed_names() {
		let document = Document::parse(br#"<a xmlns="urn:a"><b/><c/><b/></a>"#).unwrap();
		let namespace = String::from("urn:a");
		let local_name = String::from("b");

		let child = document.root().child(&namespace, &local_name);
		drop(local_name);

		assert!(child.is_some());
		assert_eq!(document.root().children_named("urn:a", "b").count(), 2);
	}

	#[test]
	fn test_doctype_is_rejected() {
		let xml = br#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<foo>&xxe;</foo>"#;
		assert_eq!(Document::parse(xml), Err(XmlError::DtdForbidden));
	}

	#[test]
	fn test_unknown_entities_are_rejected() {
		assert!(matches!(
			Document::parse(b"<foo>&xxe;</foo>"),
			Err(XmlError::Malformed { .. })
		));
	}

	#[test]
	fn test_malformed_documents() {
		for xml in [
			&b""[..],
			b"<a>",
			b"<a></b>",
			b"<a/><b/>",
			b"text<a/>",
			b"<p:a/>",
		] {
			assert!(
				matches!(Document::parse(xml), Err(XmlError::Malformed { .. })),
				"{} should be rejected",
				String::from_utf8_lossy(xml)
			);
		}
	}
}
