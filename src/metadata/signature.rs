//! Verification of the enveloped XML signature over a metadata document

use base64::{engine::general_purpose, Engine};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::certificate::TrustCertificate;
use crate::error::SignatureVerificationError;
use crate::xml::c14n::{self, Canonicalizer};
use crate::xml::{Document, Element};
use crate::XMLDSIG_NS;

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

type Result<T> = std::result::Result<T, SignatureVerificationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
	Sha1,
	Sha256,
	Sha384,
	Sha512,
}

impl DigestAlgorithm {
	pub fn from_uri(uri: &str) -> Result<Self> {
		match uri {
			"http://www.w3.org/2000/09/xmldsig#sha1" => Ok(Self::Sha1),
			DIGEST_SHA256 => Ok(Self::Sha256),
			"http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(Self::Sha384),
			"http://www.w3.org/2001/04/xmlenc#sha512" => Ok(Self::Sha512),
			_ => Err(SignatureVerificationError::unsupported(uri)),
		}
	}

	#[must_use]
	pub fn digest(self, data: &[u8]) -> Vec<u8> {
		match self {
			Self::Sha1 => Sha1::digest(data).to_vec(),
			Self::Sha256 => Sha256::digest(data).to_vec(),
			Self::Sha384 => Sha384::digest(data).to_vec(),
			Self::Sha512 => Sha512::digest(data).to_vec(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
	RsaSha1,
	RsaSha256,
	RsaSha384,
	RsaSha512,
}

impl SignatureAlgorithm {
	pub fn from_uri(uri: &str) -> Result<Self> {
		match uri {
			"http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(Self::RsaSha1),
			RSA_SHA256 => Ok(Self::RsaSha256),
			"http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(Self::RsaSha384),
			"http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(Self::RsaSha512),
			_ => Err(SignatureVerificationError::unsupported(uri)),
		}
	}

	fn verify(self, key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<()> {
		let signature = Signature::try_from(signature).map_err(|_| SignatureVerificationError::InvalidSignature)?;
		let key = key.clone();

		let verified = match self {
			Self::RsaSha1 => VerifyingKey::<Sha1>::new(key).verify(data, &signature),
			Self::RsaSha256 => VerifyingKey::<Sha256>::new(key).verify(data, &signature),
			Self::RsaSha384 => VerifyingKey::<Sha384>::new(key).verify(data, &signature),
			Self::RsaSha512 => VerifyingKey::<Sha512>::new(key).verify(data, &signature),
		};

		verified.map_err(|_| SignatureVerificationError::InvalidSignature)
	}
}

/// Checks the `ds:Signature` enveloped in the document element and returns the certificate it verified against.
///
/// With a trust anchor, the signature must be made by exactly that certificate,
/// whatever the document embeds. Without one, the embedded certificate is used.
pub fn verify_enveloped(
	document: &Document,
	signature: &Element,
	trust_anchor: Option<&TrustCertificate>,
) -> Result<TrustCertificate> {
	let root = document.root();
	let signed_info = required_child(signature, "SignedInfo")?;
	let canonicalization = required_child(signed_info, "CanonicalizationMethod")?;
	let canonicalization_uri = algorithm(canonicalization)?;
	let canonicalization_algorithm = c14n::Algorithm::from_uri(canonicalization_uri)
		.ok_or_else(|| SignatureVerificationError::unsupported(canonicalization_uri))?;
	let signature_algorithm = SignatureAlgorithm::from_uri(algorithm(required_child(signed_info, "SignatureMethod")?)?)?;

	let mut references = signed_info.children_named(XMLDSIG_NS, "Reference");
	let reference = references
		.next()
		.ok_or_else(|| SignatureVerificationError::malformed("SignedInfo has no Reference"))?;
	if references.next().is_some() {
		return Err(SignatureVerificationError::malformed(
			"SignedInfo must hold exactly one Reference",
		));
	}
	let uri = reference.attribute("URI").unwrap_or_default();
	check_reference_target(root, uri)?;

	let digest_algorithm = DigestAlgorithm::from_uri(algorithm(required_child(reference, "DigestMethod")?)?)?;
	let expected_digest = decode_base64(&required_child(reference, "DigestValue")?.text())?;
	let canonicalizer = reference_canonicalizer(reference, signature)?;
	let canonical_root = if uri.is_empty() {
		canonicalizer.canonicalize_document(document)
	} else {
		canonicalizer.canonicalize(root)
	}
	.map_err(SignatureVerificationError::malformed)?;

	if digest_algorithm.digest(canonical_root.as_bytes()) != expected_digest {
		log::debug!("Canonical form of the signed document: {canonical_root}");
		return Err(SignatureVerificationError::DigestMismatch);
	}

	let certificate = signing_certificate(signature, trust_anchor)?;
	let key = certificate
		.rsa_public_key()
		.map_err(SignatureVerificationError::malformed)?;

	let canonical_signed_info = Canonicalizer::new(canonicalization_algorithm)
		.inclusive_prefixes(prefix_list(canonicalization))
		.canonicalize(signed_info)
		.map_err(SignatureVerificationError::malformed)?;
	let signature_value = decode_base64(&required_child(signature, "SignatureValue")?.text())?;

	signature_algorithm.verify(&key, canonical_signed_info.as_bytes(), &signature_value)?;

	Ok(certificate)
}

/// The reference must cover the whole document: either `""` or `#` followed by the root's ID
fn check_reference_target(root: &Element, uri: &str) -> Result<()> {
	if uri.is_empty() {
		return Ok(());
	}

	match uri.strip_prefix('#') {
		Some(id) if root.attribute("ID") == Some(id) => Ok(()),
		_ => Err(SignatureVerificationError::ReferenceMismatch { uri: uri.to_string() }),
	}
}

/// Builds the canonicalizer the reference's transform chain describes.
/// Only enveloped-signature followed by a canonicalization is accepted.
fn reference_canonicalizer<'a>(reference: &Element, signature: &'a Element) -> Result<Canonicalizer<'a>> {
	let mut enveloped = false;
	let mut canonicalizer = Canonicalizer::new(c14n::Algorithm::Inclusive);

	let transforms = reference
		.child(XMLDSIG_NS, "Transforms")
		.into_iter()
		.flat_map(|transforms| transforms.children_named(XMLDSIG_NS, "Transform"));

	for transform in transforms {
		let uri = algorithm(transform)?;
		if uri == ENVELOPED_SIGNATURE {
			enveloped = true;
		} else if let Some(c14n_algorithm) = c14n::Algorithm::from_uri(uri) {
			canonicalizer = Canonicalizer::new(c14n_algorithm).inclusive_prefixes(prefix_list(transform));
		} else {
			return Err(SignatureVerificationError::unsupported(uri));
		}
	}

	if !enveloped {
		return Err(SignatureVerificationError::malformed(
			"Reference lacks the enveloped-signature transform",
		));
	}

	Ok(canonicalizer.excluding(signature))
}

fn signing_certificate(signature: &Element, trust_anchor: Option<&TrustCertificate>) -> Result<TrustCertificate> {
	let embedded = signature
		.child(XMLDSIG_NS, "KeyInfo")
		.and_then(|key_info| key_info.child(XMLDSIG_NS, "X509Data"))
		.and_then(|data| data.child(XMLDSIG_NS, "X509Certificate"))
		.map(|certificate| TrustCertificate::from_base64(&certificate.text()))
		.transpose()
		.map_err(SignatureVerificationError::malformed)?;

	match (trust_anchor, embedded) {
		(Some(anchor), Some(embedded)) if embedded != *anchor => {
			Err(SignatureVerificationError::UntrustedCertificate {
				thumbprint: embedded.thumbprint().to_string(),
			})
		},
		(Some(anchor), _) => Ok(anchor.clone()),
		(None, Some(embedded)) => Ok(embedded),
		(None, None) => Err(SignatureVerificationError::malformed(
			"No certificate to verify the signature with",
		)),
	}
}

fn required_child<'a>(element: &'a Element, local_name: &str) -> Result<&'a Element> {
	element
		.child(XMLDSIG_NS, local_name)
		.ok_or_else(|| SignatureVerificationError::malformed(format!("{} has no {local_name}", element.local_name())))
}

fn algorithm(element: &Element) -> Result<&str> {
	element
		.attribute("Algorithm")
		.ok_or_else(|| SignatureVerificationError::malformed(format!("{} has no Algorithm", element.local_name())))
}

fn prefix_list(element: &Element) -> Vec<String> {
	element
		.child(c14n::EXC_C14N, "InclusiveNamespaces")
		.and_then(|inclusive| inclusive.attribute("PrefixList"))
		.map(|list| list.split_whitespace().map(ToString::to_string).collect())
		.unwrap_or_default()
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
	let compact = encoded
		.chars()
		.filter(|c| !c.is_whitespace())
		.collect::<String>();

	general_purpose::STANDARD
		.decode(compact)
		.map_err(SignatureVerificationError::malformed)
}
