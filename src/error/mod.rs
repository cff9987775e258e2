//! Errors of this crate, one type per concern, gathered in [`Error`].
//!
//! Configuration errors are fatal: they are expected to abort startup. Everything
//! else is recoverable and is handled per metadata source or per request.

use derive_more::{Display, Error as DeriveError, From};

pub use self::binding::BindingError;
pub use self::config::{ConfigField, ConfigurationError};
pub use self::metadata::MetadataParseError;
pub use self::signature::SignatureVerificationError;

mod binding;
mod config;
mod metadata;
mod signature;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error that unifies all domain errors
#[derive(Debug, Display, DeriveError, From, Clone, PartialEq, Eq)]
pub enum Error {
	#[display("{_0}")]
	Configuration(ConfigurationError),

	#[display("{_0}")]
	MetadataParse(MetadataParseError),

	#[display("{_0}")]
	SignatureVerification(SignatureVerificationError),

	#[display("{_0}")]
	Binding(BindingError),

	#[display("No identity provider registered for entity id {entity_id}")]
	#[from(skip)]
	NotFound { entity_id: String },
}

impl Error {
	/// Configuration errors must abort startup, everything else can be handled by the caller
	#[must_use]
	pub const fn is_fatal(&self) -> bool {
		matches!(self, Self::Configuration(_))
	}

	pub fn not_found(entity_id: impl Into<String>) -> Self {
		Self::NotFound {
			entity_id: entity_id.into(),
		}
	}
}
