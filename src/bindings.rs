//! HTTP-Redirect and HTTP-POST bindings for outgoing `AuthnRequest`s.
//!
//! Redirect: the XML is raw-DEFLATEd, base64-encoded and percent-encoded into a
//! `SAMLRequest` query parameter on the Idp's destination.
//! POST: the XML is base64-encoded, uncompressed, into a `SAMLRequest` form field
//! meant for an auto-submitting form.

use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine};
use derive_more::Display;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::Deserialize;
use url::Url;

use crate::authn_request::AuthnRequest;
use crate::error::BindingError;

pub const SAML_REQUEST: &str = "SAMLRequest";
pub const RELAY_STATE: &str = "RelayState";
/// SAML bindings 3.4.3 and 3.5.3: RelayState MUST NOT exceed 80 bytes
pub const RELAY_STATE_MAX_LEN: usize = 80;

pub const HTTP_REDIRECT_URI: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const HTTP_POST_URI: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Binding {
	#[display("HTTP-Redirect")]
	#[serde(alias = "HTTP-Redirect", alias = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")]
	HttpRedirect,
	#[display("HTTP-POST")]
	#[serde(alias = "HTTP-POST", alias = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST")]
	HttpPost,
}

impl Binding {
	#[must_use]
	pub const fn uri(self) -> &'static str {
		match self {
			Self::HttpRedirect => HTTP_REDIRECT_URI,
			Self::HttpPost => HTTP_POST_URI,
		}
	}

	/// Bindings other than HTTP-Redirect and HTTP-POST are not supported and map to `None`
	#[must_use]
	pub fn from_uri(uri: &str) -> Option<Self> {
		match uri.trim() {
			HTTP_REDIRECT_URI => Some(Self::HttpRedirect),
			HTTP_POST_URI => Some(Self::HttpPost),
			_ => None,
		}
	}
}

/// Which endpoint to pick when metadata advertises both bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum BindingPreference {
	#[default]
	#[serde(rename = "post", alias = "PreferPost")]
	PreferPost,
	#[serde(rename = "redirect", alias = "PreferRedirect")]
	PreferRedirect,
}

impl BindingPreference {
	/// Bindings in order of preference
	#[must_use]
	pub const fn order(self) -> [Binding; 2] {
		match self {
			Self::PreferPost => [Binding::HttpPost, Binding::HttpRedirect],
			Self::PreferRedirect => [Binding::HttpRedirect, Binding::HttpPost],
		}
	}
}

/// A serialized request ready to be handed to the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
	/// Respond with a 302 to this location
	Redirect(Url),
	/// Respond with an auto-submitting form
	Post(PostForm),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostForm {
	pub action: Url,
	pub fields: Vec<(String, String)>,
}

impl PostForm {
	#[must_use]
	pub fn field(&self, name: &str) -> Option<&str> {
		self.fields
			.iter()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value.as_str())
	}

	/// Renders a page that posts the form as soon as it loads
	#[must_use]
	pub fn to_html(&self) -> String {
		let inputs = self
			.fields
			.iter()
			.map(|(name, value)| {
				format!(
					r#"<input type="hidden" name="{}" value="{}"/>"#,
					html_escape(name),
					html_escape(value)
				)
			})
			.collect::<Vec<_>>()
			.join("\n\t\t");

		format!(
			r#"<!DOCTYPE html>
<html>
<head>
	<meta charset="UTF-8">
	<title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
	<form method="post" action="{}">
		{}
		<noscript>
			<input type="submit" value="Continue"/>
		</noscript>
	</form>
</body>
</html>"#,
			html_escape(self.action.as_str()),
			inputs
		)
	}
}

pub fn serialize(request: &AuthnRequest, binding: Binding) -> Result<OutboundMessage, BindingError> {
	match binding {
		Binding::HttpRedirect => serialize_redirect(request).map(OutboundMessage::Redirect),
		Binding::HttpPost => serialize_post_form(request).map(OutboundMessage::Post),
	}
}

/// The `SAMLRequest` (and `RelayState`) query string for the redirect binding
pub fn redirect_query(request: &AuthnRequest) -> Result<String, BindingError> {
	let relay_state = checked_relay_state(request)?;
	let xml = request.to_xml()?;
	let encoded = general_purpose::STANDARD.encode(deflate(xml.as_bytes())?);

	let mut query = format!("{SAML_REQUEST}={}", urlencoding::encode(&encoded));
	if let Some(relay_state) = relay_state {
		query.push_str(&format!("&{RELAY_STATE}={}", urlencoding::encode(relay_state)));
	}

	Ok(query)
}

/// The full location to redirect the browser to
pub fn serialize_redirect(request: &AuthnRequest) -> Result<Url, BindingError> {
	let query = redirect_query(request)?;

	let mut destination = request.destination.clone();
	destination.set_fragment(None);
	let separator = if destination.query().is_some() { '&' } else { '?' };

	Url::parse(&format!("{destination}{separator}{query}")).map_err(BindingError::serialization)
}

pub fn serialize_post_form(request: &AuthnRequest) -> Result<PostForm, BindingError> {
	let relay_state = checked_relay_state(request)?;
	let xml = request.to_xml()?;

	let mut fields = vec![(SAML_REQUEST.to_string(), general_purpose::STANDARD.encode(xml))];
	if let Some(relay_state) = relay_state {
		fields.push((RELAY_STATE.to_string(), relay_state.to_string()));
	}

	Ok(PostForm {
		action: request.destination.clone(),
		fields,
	})
}

/// The XML and RelayState carried by a redirect-binding location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRedirect {
	pub xml: String,
	pub relay_state: Option<String>,
}

pub fn decode_redirect(location: &Url) -> Result<DecodedRedirect, BindingError> {
	let mut saml_request = None;
	let mut relay_state = None;

	for (key, value) in location.query_pairs() {
		match key.as_ref() {
			SAML_REQUEST => saml_request = Some(value.into_owned()),
			RELAY_STATE => relay_state = Some(value.into_owned()),
			_ => {}
		}
	}

	let saml_request = saml_request.ok_or_else(|| BindingError::decode("No SAMLRequest parameter"))?;
	let compressed = general_purpose::STANDARD
		.decode(saml_request)
		.map_err(BindingError::decode)?;

	let mut decoder = DeflateDecoder::new(&compressed[..]);
	let mut xml = String::new();
	decoder.read_to_string(&mut xml).map_err(BindingError::decode)?;

	Ok(DecodedRedirect { xml, relay_state })
}

/// Decodes the `SAMLRequest` field of a POST form
pub fn decode_post_form(form: &PostForm) -> Result<String, BindingError> {
	let encoded = form
		.field(SAML_REQUEST)
		.ok_or_else(|| BindingError::decode("No SAMLRequest field"))?;
	let decoded = general_purpose::STANDARD.decode(encoded).map_err(BindingError::decode)?;

	String::from_utf8(decoded).map_err(BindingError::decode)
}

fn checked_relay_state(request: &AuthnRequest) -> Result<Option<&str>, BindingError> {
	match request.relay_state.as_deref() {
		Some(relay_state) if relay_state.len() > RELAY_STATE_MAX_LEN => Err(BindingError::RelayStateTooLong {
			length: relay_state.len(),
			max: RELAY_STATE_MAX_LEN,
		}),
		relay_state => Ok(relay_state),
	}
}

/// Raw DEFLATE, no zlib header
fn deflate(data: &[u8]) -> Result<Vec<u8>, BindingError> {
	let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(data).map_err(BindingError::serialization)?;
	encoder.finish().map_err(BindingError::serialization)
}

fn html_escape(value: &str) -> String {
	value
		.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
		.replace('\'', "&#39;")
}
