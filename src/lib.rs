//! Relying-party side of SAML2 Web SSO.
//!
//! Keeps the set of trusted identity providers, from static configuration or
//! from their (optionally signed) metadata, and builds the `AuthnRequest`s
//! that send users to them over the HTTP-Redirect or HTTP-POST bindings.

pub mod authn_request;
pub mod bindings;
pub mod certificate;
pub mod config;
pub mod error;
pub mod identity_provider;
pub mod metadata;
pub mod registry;
pub mod utils;
pub mod xml;

#[cfg(test)]
pub mod tests;

pub use authn_request::{AuthnRequest, AuthnRequestBuilder};
pub use bindings::{Binding, BindingPreference, OutboundMessage, PostForm};
pub use certificate::TrustCertificate;
pub use config::Saml2Config;
pub use error::{Error, Result};
pub use identity_provider::{IdentityProvider, IdentityProviderBuilder};
pub use metadata::{IdpDescriptor, MetadataParser, MetadataSigner};
pub use registry::{IdentityProviderRegistry, MetadataFetcher};

pub const SAML_PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const SAML_ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const SAML_METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Environment variable naming the YAML configuration file
pub const CONFIG_FILE_ENV: &str = "SAML2_CONFIG_FILE";
