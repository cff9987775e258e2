use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bindings::{self, Binding, OutboundMessage};
use crate::error::BindingError;
use crate::identity_provider::IdentityProvider;
use crate::utils::request_id;
use crate::{SAML_ASSERTION_NS, SAML_PROTOCOL_NS};

/// A request to authenticate the current user at an identity provider.
///
/// Built fresh for every login attempt, the `id` correlates the eventual response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
	pub id: String,
	/// Always UTC, whole seconds
	pub issue_instant: DateTime<Utc>,
	pub destination: Url,
	pub issuer: String,
	pub assertion_consumer_service_url: Url,
	/// How the Idp should deliver its response to the assertion consumer service
	pub protocol_binding: Binding,
	pub force_authn: bool,
	pub is_passive: bool,
	/// Opaque to us, round-tripped through the Idp
	pub relay_state: Option<String>,
}

/// Wire form of the request. Namespace declarations are only written, the
/// deserializer matches elements by local name.
#[derive(Debug, Serialize, Deserialize)]
struct AuthnRequestXml {
	#[serde(rename = "@xmlns:samlp", skip_deserializing)]
	samlp_ns: &'static str,
	#[serde(rename = "@xmlns:saml", skip_deserializing)]
	saml_ns: &'static str,
	#[serde(rename = "@ID")]
	id: String,
	#[serde(rename = "@Version")]
	version: String,
	#[serde(rename = "@IssueInstant")]
	issue_instant: String,
	#[serde(rename = "@Destination")]
	destination: String,
	#[serde(rename = "@AssertionConsumerServiceURL")]
	acs_url: String,
	#[serde(rename = "@ProtocolBinding", default, skip_serializing_if = "Option::is_none")]
	protocol_binding: Option<String>,
	#[serde(rename = "@ForceAuthn", default, skip_serializing_if = "Option::is_none")]
	force_authn: Option<bool>,
	#[serde(rename = "@IsPassive", default, skip_serializing_if = "Option::is_none")]
	is_passive: Option<bool>,
	#[serde(rename(serialize = "saml:Issuer", deserialize = "Issuer"))]
	issuer: String,
}

impl AuthnRequest {
	/// The protocol message, exactly as it goes on the wire before binding-specific encoding
	pub fn to_xml(&self) -> Result<String, BindingError> {
		let xml = AuthnRequestXml {
			samlp_ns: SAML_PROTOCOL_NS,
			saml_ns: SAML_ASSERTION_NS,
			id: self.id.clone(),
			version: "2.0".to_string(),
			issue_instant: format_instant(&self.issue_instant),
			destination: self.destination.to_string(),
			acs_url: self.assertion_consumer_service_url.to_string(),
			protocol_binding: Some(self.protocol_binding.uri().to_string()),
			force_authn: self.force_authn.then_some(true),
			is_passive: self.is_passive.then_some(true),
			issuer: self.issuer.clone(),
		};

		quick_xml::se::to_string_with_root("samlp:AuthnRequest", &xml).map_err(BindingError::serialization)
	}

	/// Parses a serialized request. The relay state travels outside the XML and is left empty.
	pub fn from_xml(xml: &str) -> Result<Self, BindingError> {
		check_root(xml)?;
		let request = quick_xml::de::from_str::<AuthnRequestXml>(xml).map_err(BindingError::decode)?;

		if request.version != "2.0" {
			return Err(BindingError::decode(format!(
				"Unsupported SAML version {}",
				request.version
			)));
		}

		let issue_instant = DateTime::parse_from_rfc3339(&request.issue_instant)
			.map_err(BindingError::decode)?
			.with_timezone(&Utc);
		let protocol_binding = request
			.protocol_binding
			.as_deref()
			.and_then(Binding::from_uri)
			.unwrap_or(Binding::HttpPost);

		Ok(Self {
			id: request.id,
			issue_instant,
			destination: Url::parse(&request.destination).map_err(BindingError::decode)?,
			issuer: request.issuer.trim().to_string(),
			assertion_consumer_service_url: Url::parse(&request.acs_url).map_err(BindingError::decode)?,
			protocol_binding,
			force_authn: request.force_authn.unwrap_or_default(),
			is_passive: request.is_passive.unwrap_or_default(),
			relay_state: None,
		})
	}

	/// Serialize for the given binding
	pub fn bind(&self, binding: Binding) -> Result<OutboundMessage, BindingError> {
		bindings::serialize(self, binding)
	}
}

/// The document element must be `samlp:AuthnRequest`, whatever prefix it is written with
fn check_root(xml: &str) -> Result<(), BindingError> {
	let mut reader = NsReader::from_str(xml);

	loop {
		match reader.read_resolved_event().map_err(BindingError::decode)? {
			(namespace, Event::Start(start) | Event::Empty(start)) => {
				let in_protocol_ns =
					matches!(namespace, ResolveResult::Bound(ns) if ns.as_ref() == SAML_PROTOCOL_NS.as_bytes());

				return if in_protocol_ns && start.local_name().as_ref() == b"AuthnRequest" {
					Ok(())
				} else {
					Err(BindingError::decode(format!(
						"Expected an AuthnRequest, found {}",
						String::from_utf8_lossy(start.name().as_ref())
					)))
				};
			},
			(_, Event::DocType(_)) => return Err(BindingError::decode("Document type declarations are not allowed")),
			(_, Event::Eof) => return Err(BindingError::decode("Document has no root element")),
			_ => {},
		}
	}
}

/// `2024-01-31T12:00:00Z`: UTC, `Z`-suffixed, no fractional seconds
fn format_instant(instant: &DateTime<Utc>) -> String {
	instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builds an [`AuthnRequest`] addressed to one identity provider
#[derive(Debug, Clone)]
pub struct AuthnRequestBuilder<'a> {
	idp: &'a IdentityProvider,
	relay_state: Option<String>,
	force_authn: bool,
	is_passive: bool,
}

impl<'a> AuthnRequestBuilder<'a> {
	#[must_use]
	pub const fn new(idp: &'a IdentityProvider) -> Self {
		Self {
			idp,
			relay_state: None,
			force_authn: false,
			is_passive: false,
		}
	}

	#[must_use]
	pub fn relay_state(mut self, relay_state: Option<String>) -> Self {
		self.relay_state = relay_state;
		self
	}

	#[must_use]
	pub const fn force_authn(mut self, force_authn: bool) -> Self {
		self.force_authn = force_authn;
		self
	}

	#[must_use]
	pub const fn is_passive(mut self, is_passive: bool) -> Self {
		self.is_passive = is_passive;
		self
	}

	#[must_use]
	pub fn build(self) -> AuthnRequest {
		AuthnRequest {
			id: request_id(),
			issue_instant: Utc::now().trunc_subsecs(0),
			destination: self.idp.destination_uri().clone(),
			issuer: self.idp.issuer().to_string(),
			assertion_consumer_service_url: self.idp.assertion_consumer_service_url().clone(),
			protocol_binding: Binding::HttpPost,
			force_authn: self.force_authn,
			is_passive: self.is_passive,
			relay_state: self.relay_state,
		}
	}
}
