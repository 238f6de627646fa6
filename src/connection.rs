//! The two connections of an authenticator.
//!
//! The privileged connection is bound once with the configured search user
//! and shared by all searches. The verification connection is only ever used
//! to bind as the user being authenticated. Both are opened lazily and
//! reopened on the next use after their [`ConnectionMonitor`] reported them
//! as failed.
use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use tokio::sync::{broadcast, Mutex};

use crate::{
	directory::{
		ConnectionEvent, ConnectionMonitor, ConnectionRole, Directory, DirectoryConnection,
		SearchRequest,
	},
	entry::Entry,
	error::Error,
};

/// An open connection and its state.
#[derive(Debug)]
struct Session {
	/// The connection
	connection: Arc<dyn DirectoryConnection>,
	/// Tracks whether the connection is still usable
	monitor: ConnectionMonitor,
	/// Whether the last bind on this connection succeeded
	bound: bool,
}

impl Session {
	/// Whether the connection is alive and bound.
	fn is_bound(&self) -> bool {
		self.bound && self.monitor.is_alive()
	}
}

/// A lazily opened connection.
#[derive(Debug)]
struct ManagedConnection {
	/// Which connection this is
	role: ConnectionRole,
	/// Used to open the connection
	directory: Arc<dyn Directory>,
	/// The current connection, if one has been opened
	session: Mutex<Option<Session>>,
	/// Where connection failures are published
	events: broadcast::Sender<ConnectionEvent>,
	/// Set by `unbind`, no connection is opened afterwards
	closed: AtomicBool,
}

impl ManagedConnection {
	/// Create a connection that is opened on first use.
	fn new(
		role: ConnectionRole,
		directory: Arc<dyn Directory>,
		events: broadcast::Sender<ConnectionEvent>,
	) -> Self {
		Self { role, directory, session: Mutex::new(None), events, closed: AtomicBool::new(false) }
	}

	/// Take the session out of `slot` if it is still alive, otherwise open a
	/// new one. Fails once the connection was unbound.
	async fn live_session(&self, slot: &mut Option<Session>) -> Result<Session, Error> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::Closed);
		}
		match slot.take() {
			Some(session) if session.monitor.is_alive() => Ok(session),
			_ => {
				tracing::debug!(connection = %self.role, "Opening connection");
				let monitor = ConnectionMonitor::new(self.role, self.events.clone());
				let connection = self.directory.connect(monitor.clone()).await?;
				Ok(Session { connection, monitor, bound: false })
			}
		}
	}

	/// Unbind the connection if it is open. The connection is not reopened
	/// afterwards.
	async fn unbind(&self) -> Result<(), Error> {
		let mut slot = self.session.lock().await;
		self.closed.store(true, Ordering::Release);
		let Some(session) = slot.take() else {
			return Ok(());
		};
		if !session.monitor.is_alive() {
			return Ok(());
		}
		session.connection.unbind().await?;
		tracing::debug!(connection = %self.role, "Unbound connection");
		Ok(())
	}
}

/// DN and password to bind with.
struct Credentials {
	/// The DN to bind as
	dn: String,
	/// The password
	password: String,
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials").field("dn", &self.dn).finish_non_exhaustive()
	}
}

/// The connection used for searches.
#[derive(Debug)]
pub(crate) struct PrivilegedConnection {
	/// The underlying connection
	link: ManagedConnection,
	/// Identity to bind as, anonymous if unset
	credentials: Option<Credentials>,
	/// Attach raw attribute values to search results
	include_raw: bool,
}

impl PrivilegedConnection {
	/// Create a privileged connection that binds as `identity`, a pair of DN
	/// and password.
	pub(crate) fn new(
		directory: Arc<dyn Directory>,
		identity: Option<(String, String)>,
		include_raw: bool,
		events: broadcast::Sender<ConnectionEvent>,
	) -> Self {
		Self {
			link: ManagedConnection::new(ConnectionRole::Privileged, directory, events),
			credentials: identity.map(|(dn, password)| Credentials { dn, password }),
			include_raw,
		}
	}

	/// Make sure the connection is open and bound, binding only if it is not
	/// bound already. Without configured credentials the connection is used
	/// anonymously.
	pub(crate) async fn ensure_bound(&self) -> Result<Arc<dyn DirectoryConnection>, Error> {
		let mut slot = self.link.session.lock().await;
		if let Some(session) = slot.as_ref().filter(|session| session.is_bound()) {
			return Ok(Arc::clone(&session.connection));
		}

		let mut session = self.link.live_session(&mut slot).await?;
		if let Some(credentials) = &self.credentials {
			tracing::debug!(dn = %credentials.dn, "Binding privileged connection");
			if let Err(err) = session.connection.bind(&credentials.dn, &credentials.password).await
			{
				tracing::warn!("Privileged bind failed: {err}");
				*slot = Some(session);
				return Err(err.into());
			}
		}

		session.bound = true;
		let connection = Arc::clone(&session.connection);
		*slot = Some(session);
		Ok(connection)
	}

	/// Search through the privileged connection, binding it first if needed.
	pub(crate) async fn search(&self, request: &SearchRequest) -> Result<Vec<Entry>, Error> {
		let connection = self.ensure_bound().await?;
		tracing::debug!(base = %request.base, filter = %request.filter, "Searching");
		let entries = connection.search(request).await?;
		Ok(entries.into_iter().map(|entry| Entry::from_search(entry, self.include_raw)).collect())
	}

	/// Unbind the connection, if it was opened. Later uses fail with
	/// [`Error::Closed`].
	pub(crate) async fn unbind(&self) -> Result<(), Error> {
		self.link.unbind().await
	}
}

/// The connection used for checking passwords.
#[derive(Debug)]
pub(crate) struct VerificationConnection {
	/// The underlying connection
	link: ManagedConnection,
}

impl VerificationConnection {
	/// Create a verification connection.
	pub(crate) fn new(
		directory: Arc<dyn Directory>,
		events: broadcast::Sender<ConnectionEvent>,
	) -> Self {
		Self { link: ManagedConnection::new(ConnectionRole::Verification, directory, events) }
	}

	/// Check a password by binding as `dn`. Binds are serialized, so every
	/// caller sees the result of its own bind.
	pub(crate) async fn verify(&self, dn: &str, password: &str) -> Result<(), Error> {
		let mut slot = self.link.session.lock().await;
		let mut session = self.link.live_session(&mut slot).await?;
		let result = session.connection.bind(dn, password).await;
		session.bound = result.is_ok();
		*slot = Some(session);
		result.map_err(Error::Verification)
	}

	/// Unbind the connection, if it was opened.
	pub(crate) async fn unbind(&self) -> Result<(), Error> {
		self.link.unbind().await
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used)]

	use std::{collections::HashMap, io, sync::Arc};

	use async_trait::async_trait;
	use ldap3::{LdapError, LdapResult, Scope, SearchEntry};
	use tokio::sync::broadcast;

	use super::{PrivilegedConnection, VerificationConnection};
	use crate::{
		directory::{
			ConnectionMonitor, ConnectionRole, Directory, DirectoryConnection, SearchRequest,
		},
		error::Error,
	};

	#[derive(Debug, Default)]
	struct State {
		connects: usize,
		binds: Vec<String>,
		searches: usize,
		unbinds: usize,
		reject_binds: bool,
		fail_searches: bool,
		monitors: Vec<ConnectionMonitor>,
	}

	#[derive(Debug, Default, Clone)]
	struct FakeDirectory(Arc<parking_lot::Mutex<State>>);

	#[async_trait]
	impl Directory for FakeDirectory {
		async fn connect(
			&self,
			monitor: ConnectionMonitor,
		) -> Result<Arc<dyn DirectoryConnection>, Error> {
			let mut state = self.0.lock();
			state.connects += 1;
			state.monitors.push(monitor);
			Ok(Arc::new(self.clone()))
		}
	}

	#[async_trait]
	impl DirectoryConnection for FakeDirectory {
		async fn bind(&self, dn: &str, _password: &str) -> Result<(), LdapError> {
			let mut state = self.0.lock();
			state.binds.push(dn.to_owned());
			if state.reject_binds {
				return Err(result_error(49));
			}
			Ok(())
		}

		async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, LdapError> {
			let mut state = self.0.lock();
			state.searches += 1;
			if state.fail_searches {
				return Err(result_error(1));
			}
			Ok(vec![SearchEntry {
				dn: format!("uid=found,{}", request.base),
				attrs: HashMap::from([("uid".to_owned(), vec!["found".to_owned()])]),
				bin_attrs: HashMap::new(),
			}])
		}

		async fn unbind(&self) -> Result<(), LdapError> {
			self.0.lock().unbinds += 1;
			Ok(())
		}
	}

	fn result_error(rc: u32) -> LdapError {
		LdapError::LdapResult {
			result: LdapResult {
				rc,
				matched: String::new(),
				text: String::new(),
				refs: Vec::new(),
				ctrls: Vec::new(),
			},
		}
	}

	fn privileged(directory: &FakeDirectory, identity: bool) -> PrivilegedConnection {
		let (events, _) = broadcast::channel(8);
		let identity =
			identity.then(|| ("cn=admin,dc=example,dc=com".to_owned(), "secret".to_owned()));
		PrivilegedConnection::new(Arc::new(directory.clone()), identity, false, events)
	}

	fn request() -> SearchRequest {
		SearchRequest::new("dc=example,dc=com", Scope::Subtree, "(uid=found)", None)
	}

	#[tokio::test]
	async fn anonymous_does_not_bind() -> Result<(), Box<dyn std::error::Error>> {
		let directory = FakeDirectory::default();
		let connection = privileged(&directory, false);

		connection.ensure_bound().await?;
		connection.ensure_bound().await?;

		let state = directory.0.lock();
		assert_eq!(state.connects, 1, "Connection should be opened once");
		assert!(state.binds.is_empty(), "Anonymous connections should not bind");
		Ok(())
	}

	#[tokio::test]
	async fn binds_once() -> Result<(), Box<dyn std::error::Error>> {
		let directory = FakeDirectory::default();
		let connection = privileged(&directory, true);

		connection.ensure_bound().await?;
		connection.ensure_bound().await?;
		connection.search(&request()).await?;

		let state = directory.0.lock();
		assert_eq!(state.binds, ["cn=admin,dc=example,dc=com"]);
		assert_eq!(state.searches, 1);
		Ok(())
	}

	#[tokio::test]
	async fn failed_bind_is_retried_on_next_use() {
		let directory = FakeDirectory::default();
		directory.0.lock().reject_binds = true;
		let connection = privileged(&directory, true);

		assert!(matches!(connection.ensure_bound().await, Err(Error::Ldap(_))));
		assert!(matches!(connection.search(&request()).await, Err(Error::Ldap(_))));

		let state = directory.0.lock();
		assert_eq!(state.binds.len(), 2, "Every use should try to bind again");
		assert_eq!(state.searches, 0, "Search must not run without a successful bind");
		assert_eq!(state.connects, 1, "A rejected bind does not need a new connection");
	}

	#[tokio::test]
	async fn connection_error_forces_rebind() -> Result<(), Box<dyn std::error::Error>> {
		let directory = FakeDirectory::default();
		let (events, mut receiver) = broadcast::channel(8);
		let connection = PrivilegedConnection::new(
			Arc::new(directory.clone()),
			Some(("cn=admin,dc=example,dc=com".to_owned(), "secret".to_owned())),
			false,
			events,
		);

		connection.ensure_bound().await?;
		let monitor = directory.0.lock().monitors[0].clone();
		monitor.report(LdapError::from(io::Error::from(io::ErrorKind::ConnectionReset)));

		let event = receiver.recv().await?;
		assert_eq!(event.role, ConnectionRole::Privileged);

		connection.ensure_bound().await?;
		let state = directory.0.lock();
		assert_eq!(state.connects, 2, "A failed connection should be replaced");
		assert_eq!(state.binds.len(), 2, "The new connection should be bound");
		Ok(())
	}

	#[tokio::test]
	async fn search_errors_are_surfaced() {
		let directory = FakeDirectory::default();
		directory.0.lock().fail_searches = true;
		let connection = privileged(&directory, true);

		assert!(matches!(connection.search(&request()).await, Err(Error::Ldap(_))));
	}

	#[tokio::test]
	async fn verification() {
		let directory = FakeDirectory::default();
		let (events, _) = broadcast::channel(8);
		let connection = VerificationConnection::new(Arc::new(directory.clone()), events);

		assert!(connection.verify("uid=riemann,dc=example,dc=com", "password").await.is_ok());
		directory.0.lock().reject_binds = true;
		assert!(matches!(
			connection.verify("uid=riemann,dc=example,dc=com", "wrong").await,
			Err(Error::Verification(_))
		));

		let state = directory.0.lock();
		assert_eq!(state.connects, 1, "The verification connection should be reused");
		assert_eq!(state.searches, 0, "The verification connection never searches");
	}

	#[tokio::test]
	async fn unbind_only_open_connections() -> Result<(), Box<dyn std::error::Error>> {
		let directory = FakeDirectory::default();
		let unopened = privileged(&directory, true);
		unopened.unbind().await?;
		assert_eq!(directory.0.lock().unbinds, 0);

		let connection = privileged(&directory, true);
		connection.ensure_bound().await?;
		connection.unbind().await?;
		connection.unbind().await?;
		assert_eq!(directory.0.lock().unbinds, 1);
		Ok(())
	}

	#[tokio::test]
	async fn no_connection_after_unbind() -> Result<(), Box<dyn std::error::Error>> {
		let directory = FakeDirectory::default();
		let connection = privileged(&directory, true);
		connection.ensure_bound().await?;
		connection.unbind().await?;

		assert!(matches!(connection.ensure_bound().await, Err(Error::Closed)));
		assert!(matches!(connection.search(&request()).await, Err(Error::Closed)));

		let (events, _) = broadcast::channel(8);
		let verification = VerificationConnection::new(Arc::new(directory.clone()), events);
		verification.unbind().await?;
		assert!(matches!(
			verification.verify("uid=riemann,dc=example,dc=com", "password").await,
			Err(Error::Closed)
		));

		let state = directory.0.lock();
		assert_eq!(state.connects, 1, "No connection may be opened after unbinding");
		assert_eq!(state.binds.len(), 1);
		assert_eq!(state.searches, 0);
		Ok(())
	}
}
