//! Canonical XML 1.0 and Exclusive XML Canonicalization, both without comments.
//!
//! Operates on the parsed [`Element`] tree, so entity and whitespace
//! normalization have already happened by the time we serialize. The tree is
//! first rendered inclusively, which also applies the enveloped-signature
//! exclusion. Exclusive canonicalization of that rendering is then done by
//! `xml_canonicalization`, except when an `InclusiveNamespaces PrefixList` is
//! given, which that crate has no notion of.

use std::collections::{BTreeMap, BTreeSet};

use super::{Document, Element, NamespaceScope, Node, ProcessingInstruction, XmlError};

pub const C14N_10: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_11: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
	Inclusive,
	Exclusive,
}

impl Algorithm {
	/// Only the comment-less variants are accepted
	#[must_use]
	pub fn from_uri(uri: &str) -> Option<Self> {
		match uri {
			// 1.1 only differs from 1.0 in how xml:* attributes are inherited from
			// outside the apex, and none are ever inherited here
			C14N_10 | C14N_11 => Some(Self::Inclusive),
			EXC_C14N => Some(Self::Exclusive),
			_ => None,
		}
	}

	#[must_use]
	pub const fn uri(self) -> &'static str {
		match self {
			Self::Inclusive => C14N_10,
			Self::Exclusive => EXC_C14N,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Canonicalizer<'a> {
	algorithm: Algorithm,
	inclusive_prefixes: Vec<String>,
	excluded: Option<&'a Element>,
}

impl<'a> Canonicalizer<'a> {
	#[must_use]
	pub const fn new(algorithm: Algorithm) -> Self {
		Self {
			algorithm,
			inclusive_prefixes: Vec::new(),
			excluded: None,
		}
	}

	/// The `InclusiveNamespaces PrefixList` of exclusive canonicalization, `#default` names the default namespace
	#[must_use]
	pub fn inclusive_prefixes(mut self, prefixes: Vec<String>) -> Self {
		self.inclusive_prefixes = prefixes
			.into_iter()
			.map(|prefix| if prefix == "#default" { String::new() } else { prefix })
			.collect();
		self
	}

	/// Leaves the given element out of the output, as the enveloped-signature transform requires
	#[must_use]
	pub const fn excluding(mut self, element: &'a Element) -> Self {
		self.excluded = Some(element);
		self
	}

	/// Canonical form of the subtree rooted at `apex`
	pub fn canonicalize(&self, apex: &Element) -> Result<String, XmlError> {
		let mut rendered = String::new();
		self.write_element(apex, &NamespaceScope::new(), &mut rendered);

		match self.algorithm {
			Algorithm::Exclusive if self.inclusive_prefixes.is_empty() => exclusive(&rendered),
			_ => Ok(rendered),
		}
	}

	/// Canonical form of a whole document, as referenced by `URI=""`.
	/// Processing instructions around the document element are kept, one per line.
	pub fn canonicalize_document(&self, document: &Document) -> Result<String, XmlError> {
		let mut output = String::new();

		for pi in document.before_root() {
			write_processing_instruction(pi, &mut output);
			output.push('\n');
		}
		output.push_str(&self.canonicalize(document.root())?);
		for pi in document.after_root() {
			output.push('\n');
			write_processing_instruction(pi, &mut output);
		}

		Ok(output)
	}

	fn write_element(&self, element: &Element, rendered: &NamespaceScope, output: &mut String) {
		if self.excluded.is_some_and(|excluded| std::ptr::eq(excluded, element)) {
			return;
		}

		let declarations = if self.algorithm == Algorithm::Exclusive && !self.inclusive_prefixes.is_empty() {
			self.exclusive_declarations(element, rendered)
		} else {
			inclusive_declarations(element, rendered)
		};

		let name = element.qualified_name();
		output.push('<');
		output.push_str(&name);

		for (prefix, uri) in &declarations {
			if prefix.is_empty() {
				output.push_str(" xmlns=\"");
			} else {
				output.push_str(" xmlns:");
				output.push_str(prefix);
				output.push_str("=\"");
			}
			escape_attribute(uri, output);
			output.push('"');
		}

		let mut attributes = element.attributes().iter().collect::<Vec<_>>();
		attributes.sort_by(|a, b| {
			(a.namespace.as_deref().unwrap_or_default(), &a.local_name)
				.cmp(&(b.namespace.as_deref().unwrap_or_default(), &b.local_name))
		});
		for attribute in attributes {
			output.push(' ');
			output.push_str(&attribute.qualified_name());
			output.push_str("=\"");
			escape_attribute(&attribute.value, output);
			output.push('"');
		}
		output.push('>');

		let mut child_rendered = rendered.clone();
		child_rendered.extend(declarations);

		for child in element.children() {
			match child {
				Node::Element(child) => self.write_element(child, &child_rendered, output),
				Node::Text(text) => escape_text(text, output),
				Node::ProcessingInstruction(pi) => write_processing_instruction(pi, output),
			}
		}

		output.push_str("</");
		output.push_str(&name);
		output.push('>');
	}

	/// Only the namespaces the element visibly uses, plus the requested prefixes
	fn exclusive_declarations(&self, element: &Element, rendered: &NamespaceScope) -> BTreeMap<String, String> {
		let mut utilized = BTreeSet::new();
		utilized.insert(element.prefix().unwrap_or_default().to_string());
		for attribute in element.attributes() {
			if let Some(prefix) = attribute.prefix.as_deref().filter(|prefix| *prefix != "xml") {
				utilized.insert(prefix.to_string());
			}
		}
		for prefix in &self.inclusive_prefixes {
			if element.in_scope().contains_key(prefix) {
				utilized.insert(prefix.clone());
			}
		}

		utilized
			.into_iter()
			.filter_map(|prefix| {
				let uri = element.in_scope().get(&prefix).cloned().unwrap_or_default();
				let current = rendered.get(&prefix).map(String::as_str).unwrap_or_default();

				// A prefix can't be undeclared, only the default namespace can be reset to ""
				(uri != current && (prefix.is_empty() || !uri.is_empty())).then_some((prefix, uri))
			})
			.collect()
	}
}

/// Exclusive canonicalization, without comments, of an inclusively rendered subtree
fn exclusive(rendered: &str) -> Result<String, XmlError> {
	let mut output = Vec::new();
	xml_canonicalization::Canonicalizer::read_from_str(rendered)
		.write_to_writer(&mut output)
		.canonicalize(false)
		.map_err(|e| XmlError::malformed(format!("Canonicalization failed: {e}")))?;

	String::from_utf8(output).map_err(XmlError::malformed)
}

fn write_processing_instruction(pi: &ProcessingInstruction, output: &mut String) {
	output.push_str("<?");
	output.push_str(&pi.target);
	if !pi.data.is_empty() {
		output.push(' ');
		output.push_str(&pi.data);
	}
	output.push_str("?>");
}

fn inclusive_declarations(element: &Element, rendered: &NamespaceScope) -> BTreeMap<String, String> {
	let mut declarations = element
		.in_scope()
		.iter()
		.filter(|(prefix, uri)| rendered.get(*prefix) != Some(*uri))
		.map(|(prefix, uri)| (prefix.clone(), uri.clone()))
		.collect::<BTreeMap<_, _>>();

	if !element.in_scope().contains_key("") && rendered.get("").is_some_and(|uri| !uri.is_empty()) {
		declarations.insert(String::new(), String::new());
	}

	declarations
}

fn escape_text(text: &str, output: &mut String) {
	for c in text.chars() {
		match c {
			'&' => output.push_str("&amp;"),
			'<' => output.push_str("&lt;"),
			'>' => output.push_str("&gt;"),
			'\r' => output.push_str("&#xD;"),
			c => output.push(c),
		}
	}
}

fn escape_attribute(value: &str, output: &mut String) {
	for c in value.chars() {
		match c {
			'&' => output.push_str("&amp;"),
			'<' => output.push_str("&lt;"),
			'"' => output.push_str("&quot;"),
			'\t' => output.push_str("&#x9;"),
			'\n' => output.push_str("&#xA;"),
			'\r' => output.push_str("&#xD;"),
			c => output.push(c),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::xml::Document;

	fn canonicalize(algorithm: Algorithm, xml: &str) -> String {
		let document = Document::parse(xml.as_bytes()).unwrap();
		Canonicalizer::new(algorithm).canonicalize(document.root()).unwrap()
	}

	#[test]
	fn test_attributes_sorted_and_elements_expanded() {
		let xml = r#"<?xml version="1.0"?>
<!-- comment -->
<doc xmlns:b="urn:b" xmlns:a="urn:a" z="1" b:attr='x' a:attr="y &amp; &quot;" plain="&#9;"><empty/></doc>"#;

		assert_eq!(
			canonicalize(Algorithm::Inclusive, xml),
			r#"<doc xmlns:a="urn:a" xmlns:b="urn:b" plain="&#x9;" z="1" a:attr="y &amp; &quot;" b:attr="x"><empty></empty></doc>"#
		);
	}

	#[test]
	fn test_text_escaping() {
		assert_eq!(
			canonicalize(Algorithm::Exclusive, "<a>1 &lt; 2 &amp;&amp; 3 > 2 \"q\"</a>"),
			"<a>1 &lt; 2 &amp;&amp; 3 &gt; 2 \"q\"</a>"
		);
	}

	#[test]
	fn test_exclusive_only_renders_utilized_namespaces() {
		let xml = r#"<root xmlns="urn:default" xmlns:unused="urn:unused" xmlns:p="urn:p"><p:child><inner/></p:child></root>"#;
		let document = Document::parse(xml.as_bytes()).unwrap();
		let child = document.root().child("urn:p", "child").unwrap();

		assert_eq!(
			Canonicalizer::new(Algorithm::Exclusive).canonicalize(child).unwrap(),
			r#"<p:child xmlns:p="urn:p"><inner xmlns="urn:default"></inner></p:child>"#
		);
		assert_eq!(
			Canonicalizer::new(Algorithm::Inclusive).canonicalize(child).unwrap(),
			r#"<p:child xmlns="urn:default" xmlns:p="urn:p" xmlns:unused="urn:unused"><inner></inner></p:child>"#
		);
		assert_eq!(
			Canonicalizer::new(Algorithm::Exclusive)
				.inclusive_prefixes(vec!["unused".to_string()])
				.canonicalize(child)
				.unwrap(),
			r#"<p:child xmlns:p="urn:p" xmlns:unused="urn:unused"><inner xmlns="urn:default"></inner></p:child>"#
		);
	}

	#[test]
	fn test_redundant_declarations_are_dropped() {
		let xml = r#"<a:root xmlns:a="urn:a"><a:child xmlns:a="urn:a"/><other xmlns=""/></a:root>"#;

		assert_eq!(
			canonicalize(Algorithm::Exclusive, xml),
			r#"<a:root xmlns:a="urn:a"><a:child></a:child><other></other></a:root>"#
		);
	}

	#[test]
	fn test_excluded_element_is_skipped() {
		let xml = r#"<root ID="x"><ds:Signature xmlns:ds="urn:ds"><ds:Value/></ds:Signature><data>1</data></root>"#;
		let document = Document::parse(xml.as_bytes()).unwrap();
		let root = document.root();
		let signature = root.child("urn:ds", "Signature").unwrap();

		assert_eq!(
			Canonicalizer::new(Algorithm::Exclusive)
				.excluding(signature)
				.canonicalize(root)
				.unwrap(),
			r#"<root ID="x"><data>1</data></root>"#
		);
	}

	#[test]
	fn test_processing_instructions_inside_the_apex() {
		let xml = "<root><?pi  data?><child/><?bare?></root>";

		for algorithm in [Algorithm::Inclusive, Algorithm::Exclusive] {
			assert_eq!(
				canonicalize(algorithm, xml),
				"<root><?pi data?><child></child><?bare?></root>"
			);
		}
	}

	#[test]
	fn test_whole_document_keeps_surrounding_processing_instructions() {
		let xml = "<?xml version=\"1.0\"?>\n<?before a?>\n<!-- c -->\n<root>x</root>\n<?after b?>\n";
		let document = Document::parse(xml.as_bytes()).unwrap();

		assert_eq!(
			Canonicalizer::new(Algorithm::Exclusive)
				.canonicalize_document(&document)
				.unwrap(),
			"<?before a?>\n<root>x</root>\n<?after b?>"
		);
	}

	#[test]
	fn test_algorithm_uris() {
		assert_eq!(Algorithm::from_uri(C14N_10), Some(Algorithm::Inclusive));
		assert_eq!(Algorithm::from_uri(C14N_11), Some(Algorithm::Inclusive));
		assert_eq!(Algorithm::from_uri(EXC_C14N), Some(Algorithm::Exclusive));
		assert_eq!(Algorithm::from_uri("http://www.w3.org/2001/10/xml-exc-c14n#WithComments"), None);
	}
}
