//! Metadata fetch and parse errors

use derive_more::{Display, Error};

/// A metadata source could not be turned into a trusted descriptor.
/// Isolated to the failing source unless the registry is configured as strict.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum MetadataParseError {
	#[display("Malformed metadata XML: {message}")]
	MalformedXml { message: String },

	#[display("Metadata documents must not carry a DTD")]
	DtdForbidden,

	#[display("Expected an EntityDescriptor root element, found {element}")]
	UnexpectedRoot { element: String },

	#[display("Metadata is missing the required {element} element")]
	MissingElement { element: String },

	#[display("Metadata for {entity_id} advertises no supported single sign-on binding")]
	NoSupportedBinding { entity_id: String },

	#[display("Metadata carries an invalid certificate: {message}")]
	InvalidCertificate { message: String },

	#[display("Metadata for {entity_id} expired at {valid_until}")]
	Expired { entity_id: String, valid_until: String },

	#[display("Metadata describes {found} but {expected} was expected")]
	EntityIdMismatch { expected: String, found: String },

	#[display("Metadata for {entity_id} collides with an already registered Idp")]
	DuplicateEntityId { entity_id: String },

	#[display("Unable to fetch metadata from {location}: {message}")]
	Fetch { location: String, message: String },

	#[display("Timed out fetching metadata from {location}")]
	Timeout { location: String },
}

impl MetadataParseError {
	pub fn malformed(message: impl ToString) -> Self {
		Self::MalformedXml {
			message: message.to_string(),
		}
	}

	pub fn missing_element(element: impl Into<String>) -> Self {
		Self::MissingElement {
			element: element.into(),
		}
	}

	pub fn fetch(location: impl ToString, message: impl ToString) -> Self {
		Self::Fetch {
			location: location.to_string(),
			message: message.to_string(),
		}
	}
}
