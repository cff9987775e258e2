use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose, Engine};
use derive_more::{Display, Error};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;

use crate::config::CertificateSource;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("{message}")]
pub struct CertificateError {
	message: String,
}

impl CertificateError {
	fn new(message: impl ToString) -> Self {
		Self {
			message: message.to_string(),
		}
	}
}

impl From<openssl::error::ErrorStack> for CertificateError {
	fn from(error: openssl::error::ErrorStack) -> Self {
		Self::new(format!("OpenSSL error: {error}"))
	}
}

type Result<T> = std::result::Result<T, CertificateError>;

fn unreadable(path: &Path, error: &std::io::Error) -> CertificateError {
	CertificateError::new(format!("Unable to read {}: {error}", path.display()))
}

/// An X.509 certificate an identity provider signs with.
///
/// Two certificates are equal when their DER encodings are equal.
#[derive(Clone)]
pub struct TrustCertificate {
	x509: X509,
	der: Vec<u8>,
	thumbprint: String,
}

impl TrustCertificate {
	pub fn from_x509(x509: X509) -> Result<Self> {
		let der = x509.to_der()?;
		let thumbprint = hex::encode_upper(&*x509.digest(MessageDigest::sha1())?);

		Ok(Self { x509, der, thumbprint })
	}

	pub fn from_der(der: &[u8]) -> Result<Self> {
		Self::from_x509(X509::from_der(der)?)
	}

	pub fn from_pem(pem: &[u8]) -> Result<Self> {
		Self::from_x509(X509::from_pem(pem)?)
	}

	/// Parses the base64 body of a `ds:X509Certificate` element. Embedded whitespace is ignored.
	pub fn from_base64(encoded: &str) -> Result<Self> {
		let compact = encoded
			.chars()
			.filter(|c| !c.is_whitespace())
			.collect::<String>();
		let der = general_purpose::STANDARD
			.decode(compact)
			.map_err(|e| CertificateError::new(format!("Base64 error: {e}")))?;

		Self::from_der(&der)
	}

	/// Loads the certificate out of a PKCS#12 bundle; the private key, if any, is discarded
	pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self> {
		let parsed = Pkcs12::from_der(der)?.parse2(password)?;
		let cert = parsed
			.cert
			.ok_or_else(|| CertificateError::new("PKCS#12 bundle holds no certificate"))?;

		Self::from_x509(cert)
	}

	/// Reads a PEM, DER or PKCS#12 (`.pfx`/`.p12`) file
	pub fn from_file(path: &Path, password: Option<&str>) -> Result<Self> {
		let content = std::fs::read(path).map_err(|e| unreadable(path, &e))?;
		Self::from_file_content(path, &content, password)
	}

	/// Same as [`Self::from_file`], without blocking the runtime thread
	pub async fn from_file_async(path: &Path, password: Option<&str>) -> Result<Self> {
		let content = tokio::fs::read(path).await.map_err(|e| unreadable(path, &e))?;
		Self::from_file_content(path, &content, password)
	}

	/// The file extension decides between PKCS#12 and PEM/DER
	fn from_file_content(path: &Path, content: &[u8], password: Option<&str>) -> Result<Self> {
		let is_pkcs12 = path
			.extension()
			.and_then(|ext| ext.to_str())
			.is_some_and(|ext| ext.eq_ignore_ascii_case("pfx") || ext.eq_ignore_ascii_case("p12"));

		if is_pkcs12 {
			Self::from_pkcs12(content, password.unwrap_or_default())
		} else if content.starts_with(b"-----BEGIN") {
			Self::from_pem(content)
		} else {
			Self::from_der(content)
		}
	}

	pub fn load(source: &CertificateSource) -> Result<Self> {
		match source {
			CertificateSource::File { file, password } => Self::from_file(file, password.as_deref()),
			CertificateSource::Pem { pem } => Self::from_pem(pem.as_bytes()),
		}
	}

	pub async fn load_async(source: &CertificateSource) -> Result<Self> {
		match source {
			CertificateSource::File { file, password } => Self::from_file_async(file, password.as_deref()).await,
			CertificateSource::Pem { pem } => Self::from_pem(pem.as_bytes()),
		}
	}

	/// Upper-case hex SHA-1 of the DER encoding
	#[must_use]
	pub fn thumbprint(&self) -> &str {
		&self.thumbprint
	}

	#[must_use]
	pub fn der(&self) -> &[u8] {
		&self.der
	}

	/// The DER encoding in base64, as carried by `ds:X509Certificate`
	#[must_use]
	pub fn to_base64(&self) -> String {
		general_purpose::STANDARD.encode(&self.der)
	}

	#[must_use]
	pub fn subject(&self) -> String {
		self.x509
			.subject_name()
			.entries()
			.map(|entry| {
				let key = entry.object().nid().short_name().unwrap_or("?");
				let value = entry
					.data()
					.as_utf8()
					.map(|v| v.to_string())
					.unwrap_or_default();
				format!("{key}={value}")
			})
			.collect::<Vec<_>>()
			.join(", ")
	}

	pub fn rsa_public_key(&self) -> Result<RsaPublicKey> {
		let spki = self.x509.public_key()?.public_key_to_der()?;

		RsaPublicKey::from_public_key_der(&spki)
			.map_err(|e| CertificateError::new(format!("Certificate does not hold an RSA key: {e}")))
	}
}

impl PartialEq for TrustCertificate {
	fn eq(&self, other: &Self) -> bool {
		self.der == other.der
	}
}

impl Eq for TrustCertificate {}

impl fmt::Debug for TrustCertificate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TrustCertificate")
			.field("subject", &self.subject())
			.field("thumbprint", &self.thumbprint)
			.finish()
	}
}
