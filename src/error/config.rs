//! Static configuration errors

use derive_more::{Display, Error};

/// The required fields of a statically configured identity provider, in validation order
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigField {
	#[display("binding")]
	Binding,
	#[display("signing certificate")]
	SigningCertificate,
	#[display("destination Uri")]
	DestinationUri,
}

/// Errors in the relying party's own configuration. These are fatal at startup.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
	#[display("Missing {field} configuration on Idp {entity_id}.")]
	MissingField { field: ConfigField, entity_id: String },

	#[display("An Idp is configured without an entity id.")]
	MissingEntityId,

	#[display("Invalid signing certificate configuration on Idp {entity_id}: {message}")]
	InvalidCertificate { entity_id: String, message: String },

	#[display("Idp {entity_id} is configured more than once")]
	DuplicateEntityId { entity_id: String },

	#[display("Invalid metadata source {name}: {message}")]
	InvalidMetadataSource { name: String, message: String },

	#[display("Unable to load configuration: {message}")]
	Load { message: String },
}

impl ConfigurationError {
	pub fn missing(field: ConfigField, entity_id: impl Into<String>) -> Self {
		Self::MissingField {
			field,
			entity_id: entity_id.into(),
		}
	}

	pub fn invalid_certificate(entity_id: impl Into<String>, message: impl ToString) -> Self {
		Self::InvalidCertificate {
			entity_id: entity_id.into(),
			message: message.to_string(),
		}
	}

	pub fn load(message: impl ToString) -> Self {
		Self::Load {
			message: message.to_string(),
		}
	}
}
