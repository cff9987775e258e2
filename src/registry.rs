//! The set of identity providers this relying party trusts.
//!
//! Built once, on first use, from the static configuration and the configured
//! metadata sources, then read concurrently without locking.

use std::collections::BTreeMap;
use std::future::Future;

use futures::future::join_all;
use tokio::sync::OnceCell;

use crate::certificate::TrustCertificate;
use crate::config::{MetadataLocation, MetadataSourceConfig, Saml2Config};
use crate::error::{ConfigurationError, Error, MetadataParseError, Result};
use crate::identity_provider::IdentityProvider;
use crate::metadata::MetadataParser;

/// Retrieves raw metadata documents
pub trait MetadataFetcher: Send + Sync {
	fn fetch(
		&self,
		location: &MetadataLocation,
	) -> impl Future<Output = std::result::Result<Vec<u8>, MetadataParseError>> + Send;
}

/// HTTP(S) through `GET`, local paths straight from disk
impl MetadataFetcher for reqwest::Client {
	async fn fetch(&self, location: &MetadataLocation) -> std::result::Result<Vec<u8>, MetadataParseError> {
		match location {
			MetadataLocation::Url(url) => {
				let response = self
					.get(url.clone())
					.send()
					.await
					.and_then(reqwest::Response::error_for_status)
					.map_err(|e| MetadataParseError::fetch(location, e))?;

				let body = response
					.bytes()
					.await
					.map_err(|e| MetadataParseError::fetch(location, e))?;

				Ok(body.to_vec())
			},
			MetadataLocation::File(path) => tokio::fs::read(path)
				.await
				.map_err(|e| MetadataParseError::fetch(location, e)),
		}
	}
}

type ProviderMap = BTreeMap<String, IdentityProvider>;

/// A metadata source with its configuration already validated
struct PreparedSource<'a> {
	config: &'a MetadataSourceConfig,
	location: MetadataLocation,
	trust_anchor: Option<TrustCertificate>,
	parser: MetadataParser,
}

/// Lookup of identity providers by entity id.
///
/// Meant to be created once at startup and shared through an `Arc`.
pub struct IdentityProviderRegistry<F = reqwest::Client> {
	config: Saml2Config,
	fetcher: F,
	providers: OnceCell<ProviderMap>,
}

impl IdentityProviderRegistry<reqwest::Client> {
	#[must_use]
	pub fn new(config: Saml2Config) -> Self {
		Self::with_fetcher(config, reqwest::Client::new())
	}
}

impl<F: MetadataFetcher> IdentityProviderRegistry<F> {
	#[must_use]
	pub fn with_fetcher(config: Saml2Config, fetcher: F) -> Self {
		Self {
			config,
			fetcher,
			providers: OnceCell::new(),
		}
	}

	/// Builds the registry now instead of on the first lookup, so that
	/// configuration errors surface at startup
	pub async fn initialize(&self) -> Result<()> {
		let providers = self.providers().await?;
		log::info!("{} identity providers registered", providers.len());
		Ok(())
	}

	pub async fn get(&self, entity_id: &str) -> Result<&IdentityProvider> {
		self.providers()
			.await?
			.get(entity_id)
			.ok_or_else(|| Error::not_found(entity_id))
	}

	/// Every registered provider, ordered by entity id
	pub async fn all(&self) -> Result<impl Iterator<Item = (&str, &IdentityProvider)> + '_> {
		Ok(self
			.providers()
			.await?
			.iter()
			.map(|(entity_id, idp)| (entity_id.as_str(), idp)))
	}

	pub async fn len(&self) -> Result<usize> {
		Ok(self.providers().await?.len())
	}

	#[must_use]
	pub fn is_initialized(&self) -> bool {
		self.providers.initialized()
	}

	async fn providers(&self) -> Result<&ProviderMap> {
		self.providers.get_or_try_init(|| self.build()).await
	}

	async fn build(&self) -> Result<ProviderMap> {
		let mut providers = ProviderMap::new();

		for record in &self.config.identity_providers {
			let idp = IdentityProvider::load_from_config(record, &self.config.service_provider).await?;
			if providers.contains_key(idp.entity_id()) {
				return Err(ConfigurationError::DuplicateEntityId {
					entity_id: idp.entity_id().to_string(),
				}
				.into());
			}

			log::debug!("Registered Idp {} from configuration", idp.entity_id());
			providers.insert(idp.entity_id().to_string(), idp);
		}

		let mut sources = Vec::with_capacity(self.config.metadata_sources.len());
		for source in &self.config.metadata_sources {
			sources.push(self.prepare(source).await?);
		}

		let results = join_all(sources.iter().map(|source| self.load(source))).await;

		for (source, result) in sources.iter().zip(results) {
			let result = result.and_then(|idp| {
				if providers.contains_key(idp.entity_id()) {
					Err(MetadataParseError::DuplicateEntityId {
						entity_id: idp.entity_id().to_string(),
					}
					.into())
				} else {
					Ok(idp)
				}
			});

			match result {
				Ok(idp) => {
					log::info!("Registered Idp {} from metadata at {}", idp.entity_id(), source.location);
					providers.insert(idp.entity_id().to_string(), idp);
				},
				Err(e) if self.config.metadata.strict => {
					log::error!("Metadata source {} failed: {e}", source.config.name());
					return Err(e);
				},
				Err(e) => {
					log::error!("Skipping metadata source {}: {e}", source.config.name());
				},
			}
		}

		Ok(providers)
	}

	async fn prepare<'a>(
		&self,
		source: &'a MetadataSourceConfig,
	) -> std::result::Result<PreparedSource<'a>, ConfigurationError> {
		let location = source.resolve_location()?;
		let trust_anchor = match &source.trust_anchor {
			Some(anchor) => Some(TrustCertificate::load_async(anchor).await.map_err(|e| {
				ConfigurationError::InvalidMetadataSource {
					name: source.name(),
					message: format!("invalid trust anchor: {e}"),
				}
			})?),
			None => None,
		};
		let require_signature = source
			.require_signature
			.unwrap_or(self.config.metadata.require_signature);

		Ok(PreparedSource {
			config: source,
			location,
			trust_anchor,
			parser: MetadataParser::new(self.config.metadata.binding_preference, require_signature),
		})
	}

	async fn load(&self, source: &PreparedSource<'_>) -> Result<IdentityProvider> {
		let timeout = self.config.metadata.timeout;
		let xml = tokio::time::timeout(timeout, self.fetcher.fetch(&source.location))
			.await
			.map_err(|_| MetadataParseError::Timeout {
				location: source.location.to_string(),
			})??;

		let descriptor = source.parser.parse(&xml, source.trust_anchor.as_ref())?;

		if let Some(expected) = &source.config.entity_id {
			if *expected != descriptor.entity_id {
				return Err(MetadataParseError::EntityIdMismatch {
					expected: expected.clone(),
					found: descriptor.entity_id,
				}
				.into());
			}
		}

		Ok(IdentityProvider::from_metadata(descriptor, &self.config.service_provider))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::Ordering;
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;
	use crate::bindings::Binding;
	use crate::config::{CertificateSource, IdentityProviderConfig};
	use crate::tests::{init_logging, metadata_xml, test_config, test_idp_config, StaticFetcher, TEST_IDENTITY};

	const METADATA_IDP: &str = "http://localhost:13428/idpmetadata";

	fn metadata_source(entity_id: &str) -> MetadataSourceConfig {
		MetadataSourceConfig {
			entity_id: Some(entity_id.to_string()),
			..MetadataSourceConfig::default()
		}
	}

	#[tokio::test]
	async fn test_static_and_metadata_providers() {
		init_logging();
		let mut config = test_config();
		config.metadata_sources.push(metadata_source(METADATA_IDP));
		let fetcher = StaticFetcher::default().with_document(METADATA_IDP, metadata_xml(METADATA_IDP));

		let registry = IdentityProviderRegistry::with_fetcher(config, fetcher);

		let configured = registry.get("http://idp.example.com").await.unwrap();
		assert_eq!(configured.binding(), Binding::HttpPost);

		let from_metadata = registry.get(METADATA_IDP).await.unwrap();
		assert_eq!(from_metadata.entity_id(), METADATA_IDP);
		assert_eq!(from_metadata.certificate().thumbprint(), TEST_IDENTITY.certificate().thumbprint());

		let entity_ids = registry.all().await.unwrap().map(|(id, _)| id).collect::<Vec<_>>();
		assert_eq!(entity_ids, vec!["http://idp.example.com", METADATA_IDP]);
	}

	#[tokio::test]
	async fn test_unknown_entity_id() {
		let registry = IdentityProviderRegistry::with_fetcher(test_config(), StaticFetcher::default());

		assert_eq!(
			registry.get("http://unknown.example.com").await.unwrap_err(),
			Error::not_found("http://unknown.example.com")
		);
	}

	#[tokio::test]
	async fn test_invalid_static_record_is_fatal() {
		let mut config = test_config();
		config.identity_providers.push(IdentityProviderConfig {
			destination_uri: None,
			..test_idp_config("http://broken.example.com")
		});
		let registry = IdentityProviderRegistry::with_fetcher(config, StaticFetcher::default());

		let err = registry.initialize().await.unwrap_err();
		assert!(err.is_fatal());
		assert_eq!(
			err.to_string(),
			"Missing destination Uri configuration on Idp http://broken.example.com."
		);
		assert!(!registry.is_initialized());
	}

	#[tokio::test]
	async fn test_unreadable_certificate_file_is_fatal() {
		let mut config = test_config();
		config.identity_providers[0].signing_certificate = Some(CertificateSource::File {
			file: "/nonexistent/idp.pem".into(),
			password: None,
		});
		let registry = IdentityProviderRegistry::with_fetcher(config, StaticFetcher::default());

		assert!(matches!(
			registry.initialize().await,
			Err(Error::Configuration(ConfigurationError::InvalidCertificate { .. }))
		));
	}

	#[tokio::test]
	async fn test_duplicate_static_records_are_fatal() {
		let mut config = test_config();
		config.identity_providers.push(test_idp_config("http://idp.example.com"));
		let registry = IdentityProviderRegistry::with_fetcher(config, StaticFetcher::default());

		assert_eq!(
			registry.initialize().await.unwrap_err(),
			Error::Configuration(ConfigurationError::DuplicateEntityId {
				entity_id: "http://idp.example.com".to_string()
			})
		);
	}

	#[tokio::test]
	async fn test_static_record_wins_over_metadata() {
		let mut config = test_config();
		config.metadata_sources.push(MetadataSourceConfig {
			location: Some(MetadataLocation::Url(url::Url::parse("https://fed.example.com/idp.xml").unwrap())),
			..MetadataSourceConfig::default()
		});
		let fetcher = StaticFetcher::default().with_document(
			"https://fed.example.com/idp.xml",
			metadata_xml("http://idp.example.com"),
		);
		let registry = IdentityProviderRegistry::with_fetcher(config, fetcher);

		let idp = registry.get("http://idp.example.com").await.unwrap();
		assert_eq!(idp.destination_uri().as_str(), "https://idp.example.com/idp");
		assert_eq!(registry.len().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_failing_source_is_isolated() {
		init_logging();
		let mut config = test_config();
		config.metadata_sources.push(metadata_source(METADATA_IDP));
		config.metadata_sources.push(metadata_source("https://down.example.com/metadata"));
		config.metadata_sources.push(metadata_source("https://garbage.example.com/metadata"));
		let fetcher = StaticFetcher::default()
			.with_document(METADATA_IDP, metadata_xml(METADATA_IDP))
			.with_document("https://garbage.example.com/metadata", "<html>oops</html>".to_string());

		let registry = IdentityProviderRegistry::with_fetcher(config, fetcher);

		assert!(registry.get(METADATA_IDP).await.is_ok());
		assert!(matches!(
			registry.get("https://down.example.com/metadata").await,
			Err(Error::NotFound { .. })
		));
		assert_eq!(registry.len().await.unwrap(), 2);
	}

	#[tokio::test]
	async fn test_strict_mode_fails_the_build() {
		let mut config = test_config();
		config.metadata.strict = true;
		config.metadata_sources.push(metadata_source("https://down.example.com/metadata"));
		let registry = IdentityProviderRegistry::with_fetcher(config, StaticFetcher::default());

		let err = registry.get("http://idp.example.com").await.unwrap_err();
		assert!(matches!(err, Error::MetadataParse(MetadataParseError::Fetch { .. })));
		assert!(!err.is_fatal());
	}

	#[tokio::test]
	async fn test_entity_id_mismatch() {
		let mut config = test_config();
		config.metadata.strict = true;
		config.metadata_sources.push(MetadataSourceConfig {
			entity_id: Some(METADATA_IDP.to_string()),
			location: Some(MetadataLocation::Url(url::Url::parse("https://fed.example.com/idp.xml").unwrap())),
			..MetadataSourceConfig::default()
		});
		let fetcher = StaticFetcher::default().with_document(
			"https://fed.example.com/idp.xml",
			metadata_xml("https://other.example.com"),
		);
		let registry = IdentityProviderRegistry::with_fetcher(config, fetcher);

		assert_eq!(
			registry.initialize().await.unwrap_err(),
			Error::MetadataParse(MetadataParseError::EntityIdMismatch {
				expected: METADATA_IDP.to_string(),
				found: "https://other.example.com".to_string(),
			})
		);
	}

	#[tokio::test]
	async fn test_slow_source_times_out_alone() {
		let mut config = test_config();
		config.metadata.timeout = Duration::from_millis(50);
		config.metadata_sources.push(metadata_source(METADATA_IDP));
		config.metadata_sources.push(metadata_source("https://slow.example.com/metadata"));
		let fetcher = StaticFetcher::default()
			.with_document(METADATA_IDP, metadata_xml(METADATA_IDP))
			.with_delayed_document(
				"https://slow.example.com/metadata",
				metadata_xml("https://slow.example.com/metadata"),
				Duration::from_secs(30),
			);
		let registry = IdentityProviderRegistry::with_fetcher(config, fetcher);

		assert!(registry.get(METADATA_IDP).await.is_ok());
		assert!(registry.get("https://slow.example.com/metadata").await.is_err());
	}

	#[tokio::test]
	async fn test_concurrent_lookups_build_once() {
		let mut config = test_config();
		config.metadata_sources.push(metadata_source(METADATA_IDP));
		let fetcher = StaticFetcher::default().with_delayed_document(
			METADATA_IDP,
			metadata_xml(METADATA_IDP),
			Duration::from_millis(50),
		);
		let registry = Arc::new(IdentityProviderRegistry::with_fetcher(config, fetcher));

		let lookups = (0..16).map(|_| {
			let registry = Arc::clone(&registry);
			tokio::spawn(async move { registry.get(METADATA_IDP).await.map(|idp| idp.entity_id().to_string()) })
		});
		for lookup in join_all(lookups).await {
			assert_eq!(lookup.unwrap().unwrap(), METADATA_IDP);
		}

		assert_eq!(registry.fetcher.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_signed_metadata_with_trust_anchor() {
		let signed = TEST_IDENTITY.signer().sign(&metadata_xml(METADATA_IDP)).unwrap();
		let tampered = signed.replace("https://idp.example.com/sso", "https://evil.example.com/sso");

		let anchor = CertificateSource::Pem {
			pem: String::from_utf8(TEST_IDENTITY.cert.to_pem().unwrap()).unwrap(),
		};
		let mut config = test_config();
		config.metadata_sources.push(MetadataSourceConfig {
			trust_anchor: Some(anchor.clone()),
			..metadata_source(METADATA_IDP)
		});
		config.metadata_sources.push(MetadataSourceConfig {
			entity_id: None,
			location: Some(MetadataLocation::Url(url::Url::parse("https://tampered.example.com/md").unwrap())),
			trust_anchor: Some(anchor),
			require_signature: None,
		});
		let fetcher = StaticFetcher::default()
			.with_document(METADATA_IDP, signed)
			.with_document("https://tampered.example.com/md", tampered);
		let registry = IdentityProviderRegistry::with_fetcher(config, fetcher);

		// The tampered copy describes the same entity; it must not have replaced the genuine one
		let idp = registry.get(METADATA_IDP).await.unwrap();
		assert_eq!(idp.destination_uri().as_str(), "https://idp.example.com/sso");
		assert_eq!(registry.len().await.unwrap(), 2);
	}

	#[tokio::test]
	async fn test_invalid_trust_anchor_is_fatal() {
		let mut config = test_config();
		config.metadata_sources.push(MetadataSourceConfig {
			trust_anchor: Some(CertificateSource::Pem {
				pem: "not a certificate".to_string(),
			}),
			..metadata_source(METADATA_IDP)
		});
		let registry = IdentityProviderRegistry::with_fetcher(config, StaticFetcher::default());

		assert!(registry.initialize().await.unwrap_err().is_fatal());
	}
}
