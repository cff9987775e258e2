use url::Url;

use crate::authn_request::{AuthnRequest, AuthnRequestBuilder};
use crate::bindings::{Binding, OutboundMessage};
use crate::certificate::TrustCertificate;
use crate::config::{CertificateSource, IdentityProviderConfig, ServiceProviderOptions};
use crate::error::{BindingError, ConfigField, ConfigurationError};
use crate::metadata::IdpDescriptor;

/// A validated identity provider we can send users to.
///
/// Holds everything needed to address an `AuthnRequest` to it and to check
/// what it sends back. Can only be obtained through [`IdentityProviderBuilder`],
/// [`IdentityProvider::from_config`] or [`IdentityProvider::from_metadata`],
/// so every field is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProvider {
	entity_id: String,
	binding: Binding,
	destination_uri: Url,
	certificate: TrustCertificate,
	assertion_consumer_service_url: Url,
	issuer: String,
}

impl IdentityProvider {
	/// Validates a static configuration record.
	///
	/// Fields are checked in a fixed order: binding, signing certificate,
	/// destination. The first missing one is reported. The certificate is only
	/// loaded once all of them are present.
	pub fn from_config(
		record: &IdentityProviderConfig,
		service_provider: &ServiceProviderOptions,
	) -> Result<Self, ConfigurationError> {
		IdentityProviderBuilder::from(record).build(service_provider)
	}

	/// [`Self::from_config`] for async callers: certificate files are read through `tokio::fs`
	pub async fn load_from_config(
		record: &IdentityProviderConfig,
		service_provider: &ServiceProviderOptions,
	) -> Result<Self, ConfigurationError> {
		IdentityProviderBuilder::from(record)
			.build_async(service_provider)
			.await
	}

	/// Metadata has already been checked by the parser, nothing can be missing
	#[must_use]
	pub fn from_metadata(descriptor: IdpDescriptor, service_provider: &ServiceProviderOptions) -> Self {
		Self {
			entity_id: descriptor.entity_id,
			binding: descriptor.binding,
			destination_uri: descriptor.destination_uri,
			certificate: descriptor.certificate,
			assertion_consumer_service_url: service_provider.assertion_consumer_service_url.clone(),
			issuer: service_provider.entity_id.clone(),
		}
	}

	#[must_use]
	pub fn entity_id(&self) -> &str {
		&self.entity_id
	}

	#[must_use]
	pub const fn binding(&self) -> Binding {
		self.binding
	}

	#[must_use]
	pub const fn destination_uri(&self) -> &Url {
		&self.destination_uri
	}

	#[must_use]
	pub const fn certificate(&self) -> &TrustCertificate {
		&self.certificate
	}

	#[must_use]
	pub const fn assertion_consumer_service_url(&self) -> &Url {
		&self.assertion_consumer_service_url
	}

	/// Our own entity id, as the Idp knows us
	#[must_use]
	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// A fresh request for this Idp. `return_url` is carried as the relay state.
	#[must_use]
	pub fn create_authenticate_request(&self, return_url: Option<String>) -> AuthnRequest {
		AuthnRequestBuilder::new(self).relay_state(return_url).build()
	}

	/// Serializes the request with this Idp's binding
	pub fn bind(&self, request: &AuthnRequest) -> Result<OutboundMessage, BindingError> {
		request.bind(self.binding)
	}
}

#[derive(Debug, Clone)]
enum PendingCertificate {
	Loaded(TrustCertificate),
	Source(CertificateSource),
}

/// Collects the parts of an [`IdentityProvider`] and validates them all at once
#[derive(Debug, Clone)]
pub struct IdentityProviderBuilder {
	entity_id: String,
	binding: Option<Binding>,
	certificate: Option<PendingCertificate>,
	destination_uri: Option<Url>,
}

impl IdentityProviderBuilder {
	#[must_use]
	pub fn new(entity_id: impl Into<String>) -> Self {
		Self {
			entity_id: entity_id.into(),
			binding: None,
			certificate: None,
			destination_uri: None,
		}
	}

	#[must_use]
	pub const fn binding(mut self, binding: Binding) -> Self {
		self.binding = Some(binding);
		self
	}

	#[must_use]
	pub fn certificate(mut self, certificate: TrustCertificate) -> Self {
		self.certificate = Some(PendingCertificate::Loaded(certificate));
		self
	}

	/// Loaded lazily by [`Self::build`]
	#[must_use]
	pub fn certificate_source(mut self, source: CertificateSource) -> Self {
		self.certificate = Some(PendingCertificate::Source(source));
		self
	}

	#[must_use]
	pub fn destination_uri(mut self, destination_uri: Url) -> Self {
		self.destination_uri = Some(destination_uri);
		self
	}

	pub fn build(self, service_provider: &ServiceProviderOptions) -> Result<IdentityProvider, ConfigurationError> {
		let required = self.into_required()?;
		let certificate = match &required.certificate {
			PendingCertificate::Loaded(certificate) => certificate.clone(),
			PendingCertificate::Source(source) => TrustCertificate::load(source)
				.map_err(|e| ConfigurationError::invalid_certificate(&required.entity_id, e))?,
		};

		Ok(required.into_provider(certificate, service_provider))
	}

	/// Same checks as [`Self::build`], but a certificate file is read without blocking
	pub async fn build_async(self, service_provider: &ServiceProviderOptions) -> Result<IdentityProvider, ConfigurationError> {
		let required = self.into_required()?;
		let certificate = match &required.certificate {
			PendingCertificate::Loaded(certificate) => certificate.clone(),
			PendingCertificate::Source(source) => TrustCertificate::load_async(source)
				.await
				.map_err(|e| ConfigurationError::invalid_certificate(&required.entity_id, e))?,
		};

		Ok(required.into_provider(certificate, service_provider))
	}

	/// Presence of every field, in reporting order
	fn into_required(self) -> Result<Required, ConfigurationError> {
		let entity_id = self.entity_id.trim().to_string();
		if entity_id.is_empty() {
			return Err(ConfigurationError::MissingEntityId);
		}

		let binding = self
			.binding
			.ok_or_else(|| ConfigurationError::missing(ConfigField::Binding, &entity_id))?;
		let certificate = self
			.certificate
			.ok_or_else(|| ConfigurationError::missing(ConfigField::SigningCertificate, &entity_id))?;
		let destination_uri = self
			.destination_uri
			.ok_or_else(|| ConfigurationError::missing(ConfigField::DestinationUri, &entity_id))?;

		Ok(Required {
			entity_id,
			binding,
			certificate,
			destination_uri,
		})
	}
}

/// A builder whose fields are all present, the certificate possibly not loaded yet
struct Required {
	entity_id: String,
	binding: Binding,
	certificate: PendingCertificate,
	destination_uri: Url,
}

impl Required {
	fn into_provider(self, certificate: TrustCertificate, service_provider: &ServiceProviderOptions) -> IdentityProvider {
		IdentityProvider {
			entity_id: self.entity_id,
			binding: self.binding,
			destination_uri: self.destination_uri,
			certificate,
			assertion_consumer_service_url: service_provider.assertion_consumer_service_url.clone(),
			issuer: service_provider.entity_id.clone(),
		}
	}
}

impl From<&IdentityProviderConfig> for IdentityProviderBuilder {
	fn from(record: &IdentityProviderConfig) -> Self {
		Self {
			entity_id: record.entity_id.clone(),
			binding: record.binding,
			certificate: record.signing_certificate.clone().map(PendingCertificate::Source),
			destination_uri: record.destination_uri.clone(),
		}
	}
}
