//! Config for the authenticator.
use std::{
	fmt,
	io::BufReader,
	num::NonZeroUsize,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::{LdapConnSettings, Scope};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::{entry::User, error::Error};

/// Attribute name that refers to an entry's distinguished name rather than a
/// regular attribute.
pub const DN_ATTRIBUTE: &str = "dn";

/// Default number of users kept in the credential cache.
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Default lifetime of a credential cache entry, in seconds.
pub const DEFAULT_CACHE_TTL: u64 = 300;

/// Authenticator configuration.
///
/// Deserializing accepts the option names used by older deployments
/// (`bindDN`, `searchFilter`, `groupDnProperty`, ...) and resolves them into
/// this structure.
#[derive(Deserialize, Clone, Debug)]
#[serde(from = "ConfigOptions")]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings, forwarded to the LDAP client.
	pub connection: ConnectionConfig,
	/// The DN of the privileged search user. Searches are performed
	/// anonymously if unset.
	pub bind_dn: Option<String>,
	/// The password for the privileged search user
	pub bind_credentials: Option<String>,
	/// How to look up the entry of a user
	pub user_search: UserSearch,
	/// The attribute of the user entry to bind with when verifying the
	/// password.
	pub bind_property: String,
	/// How to look up the groups of a user. Group resolution is skipped if
	/// unset.
	pub group_search: Option<GroupSearch>,
	/// Attach the raw bytes of every attribute to returned entries
	pub include_raw: bool,
	/// Cache successfully verified credentials
	pub cache: bool,
	/// Maximum number of cached users
	pub cache_size: usize,
	/// Lifetime of a cached credential, in seconds
	pub cache_ttl: u64,
}

/// Flat set of options as they appear in a configuration file.
#[derive(Deserialize)]
struct ConfigOptions {
	/// See [`Config::url`]
	url: Url,
	/// See [`Config::connection`]
	#[serde(default)]
	connection: ConnectionConfig,
	/// See [`Config::bind_dn`]
	#[serde(default, alias = "bindDN", alias = "bindDn", alias = "adminDn")]
	bind_dn: Option<String>,
	/// See [`Config::bind_credentials`]
	#[serde(default, alias = "bindCredentials", alias = "adminPassword")]
	bind_credentials: Option<String>,
	/// See [`UserSearch::base`]
	#[serde(alias = "searchBase")]
	search_base: String,
	/// See [`UserSearch::filter`]
	#[serde(alias = "searchFilter")]
	search_filter: String,
	/// See [`UserSearch::scope`]
	#[serde(default, alias = "searchScope")]
	search_scope: SearchScope,
	/// See [`UserSearch::attributes`]
	#[serde(default, alias = "searchAttributes")]
	search_attributes: Option<Vec<String>>,
	/// See [`Config::bind_property`]
	#[serde(default = "default_dn_attribute", alias = "bindProperty")]
	bind_property: String,
	/// See [`GroupSearch::base`]
	#[serde(default, alias = "groupSearchBase")]
	group_search_base: Option<String>,
	/// See [`GroupSearch::filter`]
	#[serde(default, alias = "groupSearchFilter")]
	group_search_filter: Option<GroupFilter>,
	/// See [`GroupSearch::scope`]
	#[serde(default, alias = "groupSearchScope")]
	group_search_scope: SearchScope,
	/// See [`GroupSearch::attributes`]
	#[serde(default, alias = "groupSearchAttributes")]
	group_search_attributes: Option<Vec<String>>,
	/// See [`GroupSearch::dn_property`]
	#[serde(default = "default_dn_attribute", alias = "groupDnProperty")]
	group_dn_property: String,
	/// See [`Config::include_raw`]
	#[serde(default, alias = "includeRaw")]
	include_raw: bool,
	/// See [`Config::cache`]
	#[serde(default)]
	cache: bool,
	/// See [`Config::cache_size`]
	#[serde(default = "default_cache_size", alias = "cacheSize")]
	cache_size: usize,
	/// See [`Config::cache_ttl`]
	#[serde(default = "default_cache_ttl", alias = "cacheTtl")]
	cache_ttl: u64,
}

impl From<ConfigOptions> for Config {
	fn from(options: ConfigOptions) -> Self {
		// Group search is only enabled when both a base and a filter are given
		let group_search = match (options.group_search_base, options.group_search_filter) {
			(Some(base), Some(filter)) => Some(GroupSearch {
				base,
				filter,
				scope: options.group_search_scope,
				attributes: options.group_search_attributes,
				dn_property: options.group_dn_property,
			}),
			_ => None,
		};
		Self {
			url: options.url,
			connection: options.connection,
			bind_dn: options.bind_dn,
			bind_credentials: options.bind_credentials,
			user_search: UserSearch {
				base: options.search_base,
				filter: options.search_filter,
				scope: options.search_scope,
				attributes: options.search_attributes,
			},
			bind_property: options.bind_property,
			group_search,
			include_raw: options.include_raw,
			cache: options.cache,
			cache_size: options.cache_size,
			cache_ttl: options.cache_ttl,
		}
	}
}

impl Config {
	/// Create a configuration with default settings for everything except the
	/// server URL and the user search.
	#[must_use]
	pub fn new(url: Url, search_base: impl Into<String>, search_filter: impl Into<String>) -> Self {
		Self {
			url,
			connection: ConnectionConfig::default(),
			bind_dn: None,
			bind_credentials: None,
			user_search: UserSearch {
				base: search_base.into(),
				filter: search_filter.into(),
				scope: SearchScope::default(),
				attributes: None,
			},
			bind_property: default_dn_attribute(),
			group_search: None,
			include_raw: false,
			cache: false,
			cache_size: DEFAULT_CACHE_SIZE,
			cache_ttl: DEFAULT_CACHE_TTL,
		}
	}

	/// Check that the configuration can be used to authenticate users.
	pub fn validate(&self) -> Result<(), Error> {
		if !matches!(self.url.scheme(), "ldap" | "ldaps" | "ldapi") {
			return Err(Error::Config(format!("unsupported URL scheme {}", self.url.scheme())));
		}
		if self.user_search.filter.trim().is_empty() {
			return Err(Error::Config("searchFilter must be set".to_owned()));
		}
		let has_credentials =
			self.bind_credentials.as_deref().is_some_and(|credentials| !credentials.is_empty());
		if self.bind_dn.is_some() && !has_credentials {
			return Err(Error::Config("bindCredentials must be set when bindDN is".to_owned()));
		}
		if self.cache && self.cache_size == 0 {
			return Err(Error::Config("cache size must be at least 1".to_owned()));
		}
		if !self.user_search.filter.contains(crate::filter::USERNAME_PLACEHOLDER) {
			tracing::warn!(
				filter = %self.user_search.filter,
				"Search filter does not contain {}, every user will match the same entries",
				crate::filter::USERNAME_PLACEHOLDER,
			);
		}
		Ok(())
	}

	/// The privileged identity and its secret, if one is configured.
	pub(crate) fn privileged_identity(&self) -> Option<(String, String)> {
		self.bind_dn.clone().zip(self.bind_credentials.clone())
	}

	/// Capacity of the credential cache, if caching is enabled.
	pub(crate) fn cache_capacity(&self) -> Option<NonZeroUsize> {
		self.cache.then(|| NonZeroUsize::new(self.cache_size)).flatten()
	}
}

/// Default for attributes that name the entry's DN
fn default_dn_attribute() -> String {
	DN_ATTRIBUTE.to_owned()
}

/// Default for [`Config::cache_size`]
const fn default_cache_size() -> usize {
	DEFAULT_CACHE_SIZE
}

/// Default for [`Config::cache_ttl`]
const fn default_cache_ttl() -> u64 {
	DEFAULT_CACHE_TTL
}

/// Configurable filter and base to use for finding a user
#[derive(Clone, Debug)]
pub struct UserSearch {
	/// The search base to use when looking up users
	pub base: String,
	/// The search filter. Every occurrence of `{{username}}` is replaced by
	/// the escaped username.
	pub filter: String,
	/// How deep below the search base to search
	pub scope: SearchScope,
	/// Attributes to request for the user entry. All user attributes are
	/// returned if unset.
	pub attributes: Option<Vec<String>>,
}

/// Configurable filter and base to use for resolving a user's groups
#[derive(Clone, Debug)]
pub struct GroupSearch {
	/// The search base to use when looking up groups
	pub base: String,
	/// The filter selecting the groups of a user
	pub filter: GroupFilter,
	/// How deep below the search base to search
	pub scope: SearchScope,
	/// Attributes to request for group entries. All user attributes are
	/// returned if unset.
	pub attributes: Option<Vec<String>>,
	/// The attribute of the user entry that is substituted for `{{dn}}`
	pub dn_property: String,
}

/// Filter for the group search.
#[derive(Clone)]
pub enum GroupFilter {
	/// A filter template, in which every `{{dn}}` is replaced by the escaped
	/// value of [`GroupSearch::dn_property`].
	Template(String),
	/// A function building the filter from the found user.
	Function(Arc<dyn Fn(&User) -> String + Send + Sync>),
}

impl fmt::Debug for GroupFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
			Self::Function(_) => f.write_str("Function(..)"),
		}
	}
}

impl<'de> Deserialize<'de> for GroupFilter {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer).map(Self::Template)
	}
}

/// How far below the search base a search extends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
	/// Only the base entry itself
	Base,
	/// The immediate children of the base entry
	#[serde(alias = "onelevel")]
	One,
	/// The base entry and all of its descendants
	#[default]
	#[serde(alias = "subtree")]
	Sub,
}

impl From<SearchScope> for Scope {
	fn from(scope: SearchScope) -> Self {
		match scope {
			SearchScope::Base => Scope::Base,
			SearchScope::One => Scope::OneLevel,
			SearchScope::Sub => Scope::Subtree,
		}
	}
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	#[serde(default = "default_timeout", alias = "connectTimeout")]
	pub timeout: u64,

	/// LDAP operation timeout in seconds. For search per reply.
	#[serde(default, alias = "timeLimit")]
	pub operation_timeout: Option<u64>,

	/// If set, enables the [simple paged search control] and sets the page
	/// size to the given value
	///
	/// [simple paged search control]: https://www.rfc-editor.org/rfc/rfc2696.html
	#[serde(default, alias = "sizeLimit")]
	pub page_size: Option<i32>,

	/// TLS config
	#[serde(default, alias = "tlsOptions")]
	pub tls: TLSConfig,
}

/// Default connection timeout in seconds
const fn default_timeout() -> u64 {
	5
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			timeout: default_timeout(),
			operation_timeout: None,
			page_size: None,
			tls: TLSConfig::default(),
		}
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	#[serde(default)]
	pub starttls: bool,

	/// Disable verification of TLS certificates
	#[serde(default)]
	pub no_tls_verify: bool,

	/// TLS root certificates path
	#[serde(default)]
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	#[serde(default)]
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	#[serde(default)]
	pub client_certificate_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// The per-operation timeout, if any.
	pub(crate) fn operation_timeout(&self) -> Option<Duration> {
		self.operation_timeout.map(Duration::from_secs)
	}

	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			let certificates = read_certificates(path).await?;
			let (added, _ignored) = roots.add_parsable_certificates(certificates.as_slice());
			if added == 0 {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}

			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

			let config = match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
				(Some(key_path), Some(cert_path)) => {
					let chain = read_certificates(cert_path).await?;
					if chain.is_empty() {
						return Err(Error::Invalid(
							"Could not read client certificates".to_owned(),
						));
					}
					let key = read_private_key(key_path).await?;
					let chain = chain.into_iter().map(Certificate).collect();
					builder.with_client_auth_cert(chain, key)?
				}
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};

			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}

/// Read all PEM encoded certificates from a file
async fn read_certificates(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
	let pem = tokio::fs::read(path).await?;
	Ok(rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))?)
}

/// Read the first PKCS8 private key from a PEM file
async fn read_private_key(path: &Path) -> Result<PrivateKey, Error> {
	let pem = tokio::fs::read(path).await?;
	rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(pem.as_slice()))?
		.into_iter()
		.next()
		.map(PrivateKey)
		.ok_or_else(|| Error::Invalid("Could not read client key".to_owned()))
}
