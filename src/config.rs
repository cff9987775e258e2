use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::bindings::{Binding, BindingPreference};
use crate::error::ConfigurationError;
use crate::CONFIG_FILE_ENV;

const DEFAULT_CONFIG_FILE: &str = "saml2.yaml";
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the relying party needs to know to trust its identity providers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Saml2Config {
	pub service_provider: ServiceProviderOptions,
	#[serde(default)]
	pub identity_providers: Vec<IdentityProviderConfig>,
	#[serde(default)]
	pub metadata_sources: Vec<MetadataSourceConfig>,
	#[serde(default)]
	pub metadata: MetadataOptions,
}

impl Saml2Config {
	pub fn from_yaml_str(content: &str) -> Result<Self, ConfigurationError> {
		serde_yaml::from_str(content).map_err(ConfigurationError::load)
	}

	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path)
			.map_err(|e| ConfigurationError::load(format!("Unable to open config file `{}`: {e}", path.display())))?;

		Self::from_yaml_str(&content)
	}

	/// Loads the file named by `SAML2_CONFIG_FILE`, falling back to `saml2.yaml`
	pub fn from_env() -> Result<Self, ConfigurationError> {
		let path = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
		log::debug!("Loading SAML2 configuration from {path}");
		Self::from_path(path)
	}
}

/// The relying party's own identity, included in every request to every Idp
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceProviderOptions {
	pub entity_id: String,
	pub assertion_consumer_service_url: Url,
}

/// One statically configured identity provider, before validation.
///
/// Every field but `entity_id` is optional here so that a missing one can be
/// reported with a precise error by [`crate::IdentityProvider::from_config`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityProviderConfig {
	pub entity_id: String,
	#[serde(default)]
	pub binding: Option<Binding>,
	#[serde(default)]
	pub signing_certificate: Option<CertificateSource>,
	#[serde(default)]
	pub destination_uri: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CertificateSource {
	/// PEM, DER or PKCS#12 file. The password only applies to PKCS#12.
	File {
		file: PathBuf,
		#[serde(default)]
		password: Option<String>,
	},
	Pem { pem: String },
}

/// A metadata document to derive an identity provider from
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct MetadataSourceConfig {
	/// When set, the document must describe exactly this entity
	#[serde(default)]
	pub entity_id: Option<String>,
	/// Defaults to the entity id itself, which is then expected to be a URL
	#[serde(default)]
	pub location: Option<MetadataLocation>,
	/// Certificate the metadata signature must verify against.
	/// Without one, an embedded signature is verified against its own certificate.
	#[serde(default)]
	pub trust_anchor: Option<CertificateSource>,
	/// Overrides [`MetadataOptions::require_signature`] for this source
	#[serde(default)]
	pub require_signature: Option<bool>,
}

impl MetadataSourceConfig {
	/// A human readable name for logs and errors
	#[must_use]
	pub fn name(&self) -> String {
		match (&self.location, &self.entity_id) {
			(Some(location), _) => location.to_string(),
			(None, Some(entity_id)) => entity_id.clone(),
			(None, None) => "<unnamed metadata source>".to_string(),
		}
	}

	pub fn resolve_location(&self) -> Result<MetadataLocation, ConfigurationError> {
		if let Some(location) = &self.location {
			return Ok(location.clone());
		}

		let entity_id = self.entity_id.as_ref().ok_or_else(|| ConfigurationError::InvalidMetadataSource {
			name: self.name(),
			message: "either a location or an entity_id is required".to_string(),
		})?;

		Url::parse(entity_id)
			.map(MetadataLocation::Url)
			.map_err(|e| ConfigurationError::InvalidMetadataSource {
				name: self.name(),
				message: format!("entity_id is not a URL and no location was given: {e}"),
			})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MetadataLocation {
	Url(Url),
	File(PathBuf),
}

impl fmt::Display for MetadataLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Url(url) => write!(f, "{url}"),
			Self::File(path) => write!(f, "{}", path.display()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataOptions {
	/// Upper bound for fetching a single metadata source
	#[serde(default = "default_metadata_timeout", deserialize_with = "duration_str::deserialize_duration")]
	pub timeout: Duration,
	/// Fail the whole registry build when any metadata source fails
	#[serde(default)]
	pub strict: bool,
	#[serde(default)]
	pub binding_preference: BindingPreference,
	#[serde(default)]
	pub require_signature: bool,
}

const fn default_metadata_timeout() -> Duration {
	DEFAULT_METADATA_TIMEOUT
}

impl Default for MetadataOptions {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_METADATA_TIMEOUT,
			strict: false,
			binding_preference: BindingPreference::default(),
			require_signature: false,
		}
	}
}
