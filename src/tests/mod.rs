//! Shared fixtures: a generated signing identity, configuration records and an in-memory metadata fetcher

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use url::Url;

use crate::bindings::Binding;
use crate::certificate::TrustCertificate;
use crate::config::{
	CertificateSource, IdentityProviderConfig, MetadataLocation, MetadataOptions, Saml2Config,
	ServiceProviderOptions,
};
use crate::error::MetadataParseError;
use crate::identity_provider::{IdentityProvider, IdentityProviderBuilder};
use crate::metadata::MetadataSigner;
use crate::registry::MetadataFetcher;


pub const SP_ENTITY_ID: &str = "https://github.com/KentorIT/authservices";
pub const SP_ACS_URL: &str = "http://localhost/Saml2AuthenticationModule/acs";

/// A self-signed RSA key pair, standing in for an Idp's signing credentials
pub struct TestIdentity {
	pub key: PKey<Private>,
	pub cert: X509,
}

impl TestIdentity {
	pub fn generate(common_name: &str) -> Self {
		let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

		let mut name = X509NameBuilder::new().unwrap();
		name.append_entry_by_text("CN", common_name).unwrap();
		let name = name.build();

		let mut builder = X509Builder::new().unwrap();
		builder.set_version(2).unwrap();
		builder
			.set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
			.unwrap();
		builder.set_subject_name(&name).unwrap();
		builder.set_issuer_name(&name).unwrap();
		builder.set_pubkey(&key).unwrap();
		builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
		builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
		builder.sign(&key, MessageDigest::sha256()).unwrap();

		Self {
			key,
			cert: builder.build(),
		}
	}

	pub fn certificate(&self) -> TrustCertificate {
		TrustCertificate::from_x509(self.cert.clone()).unwrap()
	}

	pub fn certificate_pem(&self) -> String {
		String::from_utf8(self.cert.to_pem().unwrap()).unwrap()
	}

	pub fn private_key_pem(&self) -> String {
		String::from_utf8(self.key.private_key_to_pem_pkcs8().unwrap()).unwrap()
	}

	pub fn pkcs12(&self, password: &str) -> Vec<u8> {
		Pkcs12::builder()
			.name("idp")
			.pkey(&self.key)
			.cert(&self.cert)
			.build2(password)
			.unwrap()
			.to_der()
			.unwrap()
	}

	pub fn signer(&self) -> MetadataSigner {
		MetadataSigner::new(&self.private_key_pem(), self.certificate()).unwrap()
	}
}

lazy_static! {
	pub static ref TEST_IDENTITY: TestIdentity = TestIdentity::generate("idp.example.com");
	pub static ref OTHER_IDENTITY: TestIdentity = TestIdentity::generate("attacker.example.com");
}

pub fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_certificate() -> TrustCertificate {
	TEST_IDENTITY.certificate()
}

pub fn test_service_provider() -> ServiceProviderOptions {
	ServiceProviderOptions {
		entity_id: SP_ENTITY_ID.to_string(),
		assertion_consumer_service_url: Url::parse(SP_ACS_URL).unwrap(),
	}
}

pub fn test_identity_provider() -> IdentityProvider {
	IdentityProviderBuilder::new("http://idp.example.com")
		.binding(Binding::HttpPost)
		.certificate(test_certificate())
		.destination_uri(Url::parse("https://idp.example.com/sso").unwrap())
		.build(&test_service_provider())
		.unwrap()
}

pub fn test_idp_config(entity_id: &str) -> IdentityProviderConfig {
	IdentityProviderConfig {
		entity_id: entity_id.to_string(),
		binding: Some(Binding::HttpPost),
		signing_certificate: Some(CertificateSource::Pem {
			pem: TEST_IDENTITY.certificate_pem(),
		}),
		destination_uri: Some(Url::parse("https://idp.example.com/idp").unwrap()),
	}
}

/// One static Idp, `http://idp.example.com`, and no metadata sources
pub fn test_config() -> Saml2Config {
	Saml2Config {
		service_provider: test_service_provider(),
		identity_providers: vec![test_idp_config("http://idp.example.com")],
		metadata_sources: Vec::new(),
		metadata: MetadataOptions::default(),
	}
}

/// Metadata advertising both bindings, signed by nobody and naming [`TEST_IDENTITY`] as the signing key
pub fn metadata_xml(entity_id: &str) -> String {
	metadata_xml_with(
		entity_id,
		&[
			(Binding::HttpRedirect.uri(), "https://idp.example.com/sso/redirect"),
			(Binding::HttpPost.uri(), "https://idp.example.com/sso"),
		],
		&test_certificate(),
	)
}

pub fn metadata_xml_with(entity_id: &str, services: &[(&str, &str)], certificate: &TrustCertificate) -> String {
	let services = services
		.iter()
		.map(|(binding, location)| {
			format!(r#"<md:SingleSignOnService Binding="{binding}" Location="{location}"/>"#)
		})
		.collect::<Vec<_>>()
		.join("\n    ");

	format!(
		r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" ID="_metadata" entityID="{entity_id}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    {services}
  </md:IDPSSODescriptor>
</md:EntityDescriptor>
"#,
		certificate.to_base64()
	)
}

/// Serves metadata from memory, optionally after a delay. Unknown locations fail like a refused connection.
#[derive(Default)]
pub struct StaticFetcher {
	documents: HashMap<String, (Vec<u8>, Option<Duration>)>,
	pub calls: AtomicUsize,
}

impl StaticFetcher {
	pub fn with_document(mut self, location: &str, xml: String) -> Self {
		self.documents.insert(normalize(location), (xml.into_bytes(), None));
		self
	}

	pub fn with_delayed_document(mut self, location: &str, xml: String, delay: Duration) -> Self {
		self.documents.insert(normalize(location), (xml.into_bytes(), Some(delay)));
		self
	}
}

fn normalize(location: &str) -> String {
	Url::parse(location).map_or_else(|_| location.to_string(), |url| url.to_string())
}

impl MetadataFetcher for StaticFetcher {
	async fn fetch(&self, location: &MetadataLocation) -> Result<Vec<u8>, MetadataParseError> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let (xml, delay) = self
			.documents
			.get(&location.to_string())
			.ok_or_else(|| MetadataParseError::fetch(location, "connection refused"))?;

		if let Some(delay) = delay {
			tokio::time::sleep(*delay).await;
		}

		Ok(xml.clone())
	}
}
