//! The interface to the directory server.
//!
//! [`Directory`] opens connections, [`DirectoryConnection`] performs the
//! three operations the authenticator needs on them. The [`ldap3`] backed
//! implementation lives in [`crate::ldap`].
use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use ldap3::{LdapError, Scope, SearchEntry};
use tokio::sync::broadcast;

use crate::error::Error;

/// A single search operation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
	/// The entry to start the search at
	pub base: String,
	/// How far below the base to search
	pub scope: Scope,
	/// The search filter
	pub filter: String,
	/// The attributes to return for each entry
	pub attributes: Vec<String>,
}

impl SearchRequest {
	/// Create a search request. All user attributes are requested if no
	/// attribute list is given.
	#[must_use]
	pub fn new(
		base: impl Into<String>,
		scope: impl Into<Scope>,
		filter: impl Into<String>,
		attributes: Option<&[String]>,
	) -> Self {
		let attributes = match attributes {
			Some(attributes) => attributes.to_vec(),
			None => vec!["*".to_owned()],
		};
		Self { base: base.into(), scope: scope.into(), filter: filter.into(), attributes }
	}
}

/// Opens connections to a directory server.
#[async_trait]
pub trait Directory: Send + Sync + fmt::Debug {
	/// Open a new connection. Connection-level failures occurring after the
	/// connection is established must be reported to `monitor`.
	async fn connect(&self, monitor: ConnectionMonitor)
		-> Result<Arc<dyn DirectoryConnection>, Error>;
}

/// An open connection to a directory server.
///
/// Operations may be issued concurrently, each call only observes the
/// response to its own request.
#[async_trait]
pub trait DirectoryConnection: Send + Sync + fmt::Debug {
	/// Authenticate the connection with a DN and password.
	async fn bind(&self, dn: &str, password: &str) -> Result<(), LdapError>;

	/// Perform a search, returning every matching entry in the order the
	/// server sent them. Fails if the search did not complete successfully,
	/// even if some entries were already received.
	async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, LdapError>;

	/// Unbind and close the connection.
	async fn unbind(&self) -> Result<(), LdapError>;
}

/// Which of the authenticator's connections an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
	/// The connection used for searches
	Privileged,
	/// The connection used for checking passwords
	Verification,
}

impl fmt::Display for ConnectionRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Privileged => f.write_str("privileged"),
			Self::Verification => f.write_str("verification"),
		}
	}
}

/// A connection failed outside of any pending operation.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
	/// The connection that failed
	pub role: ConnectionRole,
	/// The reported error
	pub error: Arc<LdapError>,
}

/// Handle through which a [`Directory`] reports the state of a connection it
/// opened.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
	/// The connection being monitored
	role: ConnectionRole,
	/// Cleared once the connection can no longer be used
	alive: Arc<AtomicBool>,
	/// Subscribers to connection failures
	events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionMonitor {
	/// Create a monitor for a new connection.
	pub(crate) fn new(role: ConnectionRole, events: broadcast::Sender<ConnectionEvent>) -> Self {
		Self { role, alive: Arc::new(AtomicBool::new(true)), events }
	}

	/// The connection failed. It is marked dead and the error is passed on to
	/// subscribers.
	pub fn report(&self, error: LdapError) {
		self.alive.store(false, Ordering::Release);
		tracing::warn!(connection = %self.role, "Ldap connection error {error}");
		let event = ConnectionEvent { role: self.role, error: Arc::new(error) };
		if self.events.send(event).is_err() {
			tracing::debug!("No subscribers for connection errors");
		}
	}

	/// Which connection is monitored.
	#[must_use]
	pub fn role(&self) -> ConnectionRole {
		self.role
	}

	/// The connection was closed without an error.
	pub fn closed(&self) {
		self.alive.store(false, Ordering::Release);
		tracing::debug!(connection = %self.role, "Ldap connection closed");
	}

	/// Whether the connection is still usable.
	#[must_use]
	pub fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Acquire)
	}
}
