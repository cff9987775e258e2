use std::io::{Cursor, Write};

use base64::engine::general_purpose;
use base64::Engine;
use derive_more::{Display, Error};
use quick_xml::events::Event;
use quick_xml::se::to_string_with_root;
use quick_xml::{Reader, Writer};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::signature::{DIGEST_SHA256, ENVELOPED_SIGNATURE, RSA_SHA256};
use crate::certificate::TrustCertificate;
use crate::xml::c14n::{self, Canonicalizer};
use crate::xml::Document;
use crate::XMLDSIG_NS;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("Unable to sign metadata: {message}")]
pub struct SigningError {
	message: String,
}

impl SigningError {
	fn new(message: impl ToString) -> Self {
		Self {
			message: message.to_string(),
		}
	}
}

#[derive(Debug, Clone, Serialize)]
struct Signature {
	#[serde(rename = "@xmlns:ds")]
	ds_ns: &'static str,
	#[serde(rename = "ds:SignedInfo")]
	signed_info: SignedInfo,
	#[serde(rename = "ds:SignatureValue")]
	signature_value: String,
	#[serde(rename = "ds:KeyInfo")]
	key_info: KeyInfo,
}

#[derive(Debug, Clone, Serialize)]
struct SignedInfo {
	#[serde(rename = "ds:CanonicalizationMethod")]
	canonicalization_method: Algorithm,
	#[serde(rename = "ds:SignatureMethod")]
	signature_method: Algorithm,
	#[serde(rename = "ds:Reference")]
	reference: Reference,
}

#[derive(Debug, Clone, Serialize)]
struct Algorithm {
	#[serde(rename = "@Algorithm")]
	algorithm: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct Reference {
	#[serde(rename = "@URI")]
	uri: String,
	#[serde(rename = "ds:Transforms")]
	transforms: Transforms,
	#[serde(rename = "ds:DigestMethod")]
	digest_method: Algorithm,
	#[serde(rename = "ds:DigestValue")]
	digest_value: String,
}

#[derive(Debug, Clone, Serialize)]
struct Transforms {
	#[serde(rename = "ds:Transform")]
	transform: Vec<Algorithm>,
}

#[derive(Debug, Clone, Serialize)]
struct KeyInfo {
	#[serde(rename = "ds:X509Data")]
	x509_data: X509Data,
}

#[derive(Debug, Clone, Serialize)]
struct X509Data {
	#[serde(rename = "ds:X509Certificate")]
	x509_certificate: String,
}

/// Publishes signed metadata: an enveloped RSA-SHA256 signature with exclusive canonicalization
#[derive(Clone)]
pub struct MetadataSigner {
	private_key: RsaPrivateKey,
	certificate: TrustCertificate,
}

impl MetadataSigner {
	/// Accepts PKCS#8 or PKCS#1 PEM keys
	pub fn new(private_key_pem: &str, certificate: TrustCertificate) -> Result<Self, SigningError> {
		let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
			.or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
			.map_err(SigningError::new)?;

		Ok(Self {
			private_key,
			certificate,
		})
	}

	#[must_use]
	pub const fn certificate(&self) -> &TrustCertificate {
		&self.certificate
	}

	/// Signs the root element of `xml`, inserting `ds:Signature` as its first child
	pub fn sign(&self, xml: &str) -> Result<String, SigningError> {
		let document = Document::parse(xml.as_bytes()).map_err(SigningError::new)?;
		let root = document.root();

		if root.child(XMLDSIG_NS, "Signature").is_some() {
			return Err(SigningError::new("document is already signed"));
		}

		let reference_uri = root.attribute("ID").map(|id| format!("#{id}")).unwrap_or_default();
		let canonicalizer = Canonicalizer::new(c14n::Algorithm::Exclusive);
		let canonical_root = if reference_uri.is_empty() {
			canonicalizer.canonicalize_document(&document)
		} else {
			canonicalizer.canonicalize(root)
		}
		.map_err(SigningError::new)?;
		let digest_value = general_purpose::STANDARD.encode(Sha256::digest(canonical_root.as_bytes()));

		let mut signature = Signature {
			ds_ns: XMLDSIG_NS,
			signed_info: SignedInfo {
				canonicalization_method: Algorithm {
					algorithm: c14n::EXC_C14N,
				},
				signature_method: Algorithm {
					algorithm: RSA_SHA256,
				},
				reference: Reference {
					uri: reference_uri,
					transforms: Transforms {
						transform: vec![
							Algorithm {
								algorithm: ENVELOPED_SIGNATURE,
							},
							Algorithm {
								algorithm: c14n::EXC_C14N,
							},
						],
					},
					digest_method: Algorithm {
						algorithm: DIGEST_SHA256,
					},
					digest_value,
				},
			},
			signature_value: String::new(),
			key_info: KeyInfo {
				x509_data: X509Data {
					x509_certificate: self.certificate.to_base64(),
				},
			},
		};

		// SignedInfo is canonicalized out of the serialized fragment so that the
		// bytes we sign are exactly what a verifier reconstructs
		let unsigned = to_string_with_root("ds:Signature", &signature).map_err(SigningError::new)?;
		let fragment = Document::parse(unsigned.as_bytes()).map_err(SigningError::new)?;
		let signed_info = fragment
			.root()
			.child(XMLDSIG_NS, "SignedInfo")
			.ok_or_else(|| SigningError::new("serialized signature lacks SignedInfo"))?;
		let canonical_signed_info = Canonicalizer::new(c14n::Algorithm::Exclusive)
			.canonicalize(signed_info)
			.map_err(SigningError::new)?;

		signature.signature_value = self.sign_data(&canonical_signed_info);
		let signature_xml = to_string_with_root("ds:Signature", &signature).map_err(SigningError::new)?;

		insert_after_root_start(xml, &signature_xml)
	}

	fn sign_data(&self, data: &str) -> String {
		let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
		let signature = signing_key.sign(data.as_bytes());
		general_purpose::STANDARD.encode(signature.to_bytes())
	}
}

fn insert_after_root_start(xml: &str, fragment: &str) -> Result<String, SigningError> {
	let mut reader = Reader::from_str(xml);
	let mut writer = Writer::new(Cursor::new(Vec::new()));
	let mut inserted = false;

	loop {
		match reader.read_event() {
			Ok(Event::Start(e)) if !inserted => {
				writer.write_event(Event::Start(e)).map_err(SigningError::new)?;
				writer
					.get_mut()
					.write_all(fragment.as_bytes())
					.map_err(SigningError::new)?;
				inserted = true;
			},
			Ok(Event::Empty(_)) if !inserted => {
				return Err(SigningError::new("root element has no content"));
			},
			Ok(Event::Eof) => break,
			Ok(event) => writer.write_event(event).map_err(SigningError::new)?,
			Err(e) => {
				return Err(SigningError::new(format!(
					"Error at position {}: {e}",
					reader.buffer_position()
				)))
			},
		}
	}

	String::from_utf8(writer.into_inner().into_inner()).map_err(SigningError::new)
}
