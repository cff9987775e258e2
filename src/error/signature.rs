//! XML digital signature errors

use derive_more::{Display, Error};

/// An embedded signature is absent when required, or present and not valid.
/// The signed document must never be used when this is returned.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum SignatureVerificationError {
	#[display("Metadata is required to be signed but carries no signature")]
	Missing,

	#[display("Signature reference {uri} does not cover the EntityDescriptor")]
	ReferenceMismatch { uri: String },

	#[display("Unsupported signature algorithm {algorithm}")]
	UnsupportedAlgorithm { algorithm: String },

	#[display("Digest value mismatch, the signed content was altered")]
	DigestMismatch,

	#[display("Signature value does not verify against the signing certificate")]
	InvalidSignature,

	#[display("Metadata was signed by a certificate that is not trusted ({thumbprint})")]
	UntrustedCertificate { thumbprint: String },

	#[display("Malformed signature: {message}")]
	Malformed { message: String },
}

impl SignatureVerificationError {
	pub fn malformed(message: impl ToString) -> Self {
		Self::Malformed {
			message: message.to_string(),
		}
	}

	pub fn unsupported(algorithm: impl Into<String>) -> Self {
		Self::UnsupportedAlgorithm {
			algorithm: algorithm.into(),
		}
	}
}
