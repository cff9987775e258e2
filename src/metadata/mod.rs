//! SAML2 metadata: turning an `EntityDescriptor` into a trusted identity provider description

use chrono::{DateTime, Utc};
use url::Url;

use crate::bindings::{Binding, BindingPreference};
use crate::certificate::TrustCertificate;
use crate::error::{MetadataParseError, Result, SignatureVerificationError};
use crate::xml::{Document, Element};
use crate::{SAML_METADATA_NS, SAML_PROTOCOL_NS, XMLDSIG_NS};

pub mod signature;
pub mod signer;

pub use signer::{MetadataSigner, SigningError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleSignOnService {
	pub binding: Binding,
	pub location: Url,
}

/// Everything an identity provider's metadata told us, after it was checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpDescriptor {
	pub entity_id: String,
	/// Chosen among the advertised endpoints according to the binding preference
	pub binding: Binding,
	pub destination_uri: Url,
	/// The first signing certificate
	pub certificate: TrustCertificate,
	pub signing_certificates: Vec<TrustCertificate>,
	pub single_sign_on_services: Vec<SingleSignOnService>,
	pub valid_until: Option<DateTime<Utc>>,
	/// Whether the document carried a signature that verified
	pub signed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataParser {
	pub binding_preference: BindingPreference,
	pub require_signature: bool,
}

impl MetadataParser {
	#[must_use]
	pub const fn new(binding_preference: BindingPreference, require_signature: bool) -> Self {
		Self {
			binding_preference,
			require_signature,
		}
	}

	/// Parses and checks a metadata document.
	///
	/// An embedded signature is always verified before any field is read. A
	/// configured trust anchor makes the signature mandatory, as does
	/// `require_signature`.
	pub fn parse(&self, xml: &[u8], trust_anchor: Option<&TrustCertificate>) -> Result<IdpDescriptor> {
		let document = Document::parse(xml).map_err(MetadataParseError::from)?;
		let root = document.root();

		if !root.is(SAML_METADATA_NS, "EntityDescriptor") {
			return Err(MetadataParseError::UnexpectedRoot {
				element: root.qualified_name(),
			}
			.into());
		}

		let signed = match root.child(XMLDSIG_NS, "Signature") {
			Some(signature) => {
				let certificate = signature::verify_enveloped(&document, signature, trust_anchor)?;
				log::debug!("Metadata signature verified against {}", certificate.thumbprint());
				true
			},
			None if self.require_signature || trust_anchor.is_some() => {
				return Err(SignatureVerificationError::Missing.into());
			},
			None => false,
		};

		let entity_id = root
			.attribute("entityID")
			.map(str::trim)
			.filter(|entity_id| !entity_id.is_empty())
			.ok_or_else(|| MetadataParseError::missing_element("EntityDescriptor entityID"))?
			.to_string();

		let valid_until = root
			.attribute("validUntil")
			.map(|valid_until| {
				DateTime::parse_from_rfc3339(valid_until)
					.map(|valid_until| valid_until.with_timezone(&Utc))
					.map_err(|e| MetadataParseError::malformed(format!("Invalid validUntil {valid_until}: {e}")))
			})
			.transpose()?;

		if let Some(valid_until) = valid_until.filter(|valid_until| *valid_until < Utc::now()) {
			return Err(MetadataParseError::Expired {
				entity_id,
				valid_until: valid_until.to_rfc3339(),
			}
			.into());
		}

		let descriptor = root
			.children_named(SAML_METADATA_NS, "IDPSSODescriptor")
			.find(|descriptor| supports_saml2(descriptor))
			.ok_or_else(|| MetadataParseError::missing_element("IDPSSODescriptor"))?;

		let single_sign_on_services = single_sign_on_services(descriptor)?;
		let selected = self
			.binding_preference
			.order()
			.into_iter()
			.find_map(|binding| {
				single_sign_on_services
					.iter()
					.find(|service| service.binding == binding)
			})
			.cloned()
			.ok_or_else(|| MetadataParseError::NoSupportedBinding {
				entity_id: entity_id.clone(),
			})?;

		let signing_certificates = signing_certificates(descriptor)?;
		let certificate = signing_certificates
			.first()
			.cloned()
			.ok_or_else(|| MetadataParseError::missing_element("KeyDescriptor X509Certificate"))?;

		log::debug!(
			"Parsed metadata for {entity_id}: {} at {}",
			selected.binding,
			selected.location
		);

		Ok(IdpDescriptor {
			entity_id,
			binding: selected.binding,
			destination_uri: selected.location,
			certificate,
			signing_certificates,
			single_sign_on_services,
			valid_until,
			signed,
		})
	}
}

fn supports_saml2(descriptor: &Element) -> bool {
	descriptor
		.attribute("protocolSupportEnumeration")
		.is_some_and(|protocols| protocols.split_whitespace().any(|protocol| protocol == SAML_PROTOCOL_NS))
}

/// Endpoints with bindings we can't speak are skipped
fn single_sign_on_services(descriptor: &Element) -> Result<Vec<SingleSignOnService>> {
	let mut services = Vec::new();

	for service in descriptor.children_named(SAML_METADATA_NS, "SingleSignOnService") {
		let Some(binding) = service.attribute("Binding").and_then(Binding::from_uri) else {
			continue;
		};
		let location = service
			.attribute("Location")
			.ok_or_else(|| MetadataParseError::missing_element("SingleSignOnService Location"))?;
		let location = Url::parse(location.trim())
			.map_err(|e| MetadataParseError::malformed(format!("Invalid SingleSignOnService Location {location}: {e}")))?;

		services.push(SingleSignOnService { binding, location });
	}

	Ok(services)
}

fn signing_certificates(descriptor: &Element) -> Result<Vec<TrustCertificate>> {
	let mut certificates = Vec::new();

	let key_descriptors = descriptor
		.children_named(SAML_METADATA_NS, "KeyDescriptor")
		.filter(|key_descriptor| matches!(key_descriptor.attribute("use"), None | Some("signing")));

	for key_descriptor in key_descriptors {
		let x509_certificates = key_descriptor
			.child(XMLDSIG_NS, "KeyInfo")
			.into_iter()
			.flat_map(|key_info| key_info.children_named(XMLDSIG_NS, "X509Data"))
			.flat_map(|data| data.children_named(XMLDSIG_NS, "X509Certificate"));

		for x509_certificate in x509_certificates {
			let certificate = TrustCertificate::from_base64(&x509_certificate.text())
				.map_err(|e| MetadataParseError::InvalidCertificate { message: e.to_string() })?;
			certificates.push(certificate);
		}
	}

	Ok(certificates)
}
