//! Client for connecting to an LDAP server with [`ldap3`]

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use ldap3::{
	adapters::{Adapter, EntriesOnly, PagedResults},
	LdapConnAsync, LdapError, LdapResult, SearchEntry, SearchStream,
};
use url::Url;

use crate::{
	config::{Config, ConnectionConfig},
	directory::{ConnectionMonitor, Directory, DirectoryConnection, SearchRequest},
	error::Error,
};

/// Opens connections to the LDAP server named in the configuration.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
	/// The URL of the server
	url: Url,
	/// Connection settings
	connection: ConnectionConfig,
}

impl LdapDirectory {
	/// Create a [`LdapDirectory`] for the server and connection settings of
	/// the given configuration.
	#[must_use]
	pub fn new(config: &Config) -> Self {
		Self { url: config.url.clone(), connection: config.connection.clone() }
	}
}

#[async_trait]
impl Directory for LdapDirectory {
	/// Create a connection to an ldap server based on the settings and url
	/// specified in the configuration.
	async fn connect(
		&self,
		monitor: ConnectionMonitor,
	) -> Result<Arc<dyn DirectoryConnection>, Error> {
		let settings = self.connection.to_settings().await?;
		let (conn, ldap) = LdapConnAsync::from_url_with_settings(settings, &self.url).await?;
		tokio::spawn(async move {
			match conn.drive().await {
				Ok(()) => monitor.closed(),
				Err(err) => monitor.report(err),
			}
		});
		tracing::debug!(url = %self.url, "Connected to LDAP server");

		Ok(Arc::new(LdapConnection {
			ldap,
			operation_timeout: self.connection.operation_timeout(),
			page_size: self.connection.page_size,
		}))
	}
}

/// A connection established by [`LdapDirectory`].
struct LdapConnection {
	/// Handle to the connection, cloned for every operation
	ldap: ldap3::Ldap,
	/// Timeout applied to every operation
	operation_timeout: Option<Duration>,
	/// Page size for searches, if paging is enabled
	page_size: Option<i32>,
}

impl LdapConnection {
	/// A handle for a single operation, with the operation timeout applied.
	fn handle(&self) -> ldap3::Ldap {
		let mut ldap = self.ldap.clone();
		if let Some(timeout) = self.operation_timeout {
			ldap.with_timeout(timeout);
		}
		ldap
	}
}

impl fmt::Debug for LdapConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapConnection")
			.field("operation_timeout", &self.operation_timeout)
			.field("page_size", &self.page_size)
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
	async fn bind(&self, dn: &str, password: &str) -> Result<(), LdapError> {
		self.handle().simple_bind(dn, password).await?.success()?;
		Ok(())
	}

	async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, LdapError> {
		// Prepare search parameters
		let mut adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(EntriesOnly::new())];
		if let Some(page_size) = self.page_size {
			adapters.push(Box::new(PagedResults::new(page_size)));
		}

		let mut ldap = self.handle();
		let mut search = ldap
			.streaming_search_with(
				adapters,
				&request.base,
				request.scope,
				&request.filter,
				request.attributes.clone(),
			)
			.await?;

		// Perform the search
		collect_entries(&mut search).await
	}

	async fn unbind(&self) -> Result<(), LdapError> {
		self.ldap.clone().unbind().await
	}
}

/// The parts of a streaming search consumed by [`collect_entries`].
#[async_trait]
trait ResultStream: Send {
	/// The next entry, or `None` once the server sent its final result.
	async fn next_entry(&mut self) -> Result<Option<SearchEntry>, LdapError>;

	/// The final result of the search.
	async fn finish(&mut self) -> LdapResult;
}

#[async_trait]
impl<'a, S, A> ResultStream for SearchStream<'a, S, A>
where
	S: AsRef<str> + Send + Sync + 'a,
	A: AsRef<[S]> + Send + Sync + 'a,
{
	async fn next_entry(&mut self) -> Result<Option<SearchEntry>, LdapError> {
		Ok(self.next().await?.map(SearchEntry::construct))
	}

	async fn finish(&mut self) -> LdapResult {
		SearchStream::finish(self).await
	}
}

/// Collect every entry of a search in the order the server sent them. A
/// stream error ends the search, and a non-zero final result code fails it
/// even if entries were received.
async fn collect_entries<R: ResultStream>(stream: &mut R) -> Result<Vec<SearchEntry>, LdapError> {
	let mut entries = Vec::new();
	while let Some(entry) = stream.next_entry().await? {
		entries.push(entry);
	}
	stream.finish().await.success()?;
	Ok(entries)
}
