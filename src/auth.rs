//! Authentication of users against the directory

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
	cache::CredentialCache,
	config::{Config, UserSearch, DN_ATTRIBUTE},
	connection::{PrivilegedConnection, VerificationConnection},
	directory::{ConnectionEvent, Directory, SearchRequest},
	entry::{SearchEntryExt, User},
	error::Error,
	filter::{self, USERNAME_PLACEHOLDER},
	groups::GroupResolver,
	ldap::LdapDirectory,
};

/// Capacity of the connection event channel
const EVENT_CAPACITY: usize = 16;

/// Authenticates users by searching for their entry and binding as it.
///
/// Cheap to share between tasks behind an [`Arc`]; concurrent calls to
/// [`Authenticator::authenticate`] share both connections.
#[derive(Debug)]
pub struct Authenticator {
	/// The user search settings
	user_search: UserSearch,
	/// Attribute of the user entry to bind as
	bind_property: String,
	/// Attributes requested in the user search
	user_attributes: Option<Vec<String>>,
	/// Connection used for searches
	privileged: PrivilegedConnection,
	/// Connection used for checking passwords
	verification: VerificationConnection,
	/// How groups are resolved
	groups: GroupResolver,
	/// Verified credentials, if caching is enabled
	cache: Option<CredentialCache>,
	/// Publishes connection failures
	events: broadcast::Sender<ConnectionEvent>,
	/// Set once the authenticator was closed
	closed: AtomicBool,
}

impl Authenticator {
	/// Create an authenticator connecting to the LDAP server in the
	/// configuration. No connection is made until the first authentication.
	pub fn new(config: Config) -> Result<Self, Error> {
		let directory = LdapDirectory::new(&config);
		Self::with_directory(config, Arc::new(directory))
	}

	/// Create an authenticator using a custom [`Directory`].
	pub fn with_directory(config: Config, directory: Arc<dyn Directory>) -> Result<Self, Error> {
		config.validate()?;

		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let privileged = PrivilegedConnection::new(
			Arc::clone(&directory),
			config.privileged_identity(),
			config.include_raw,
			events.clone(),
		);
		let verification = VerificationConnection::new(directory, events.clone());
		let cache = config
			.cache_capacity()
			.map(|capacity| CredentialCache::new(capacity, Duration::from_secs(config.cache_ttl)));

		// The bind property must be part of the returned entry
		let user_attributes = config.user_search.attributes.clone().map(|mut attributes| {
			if config.bind_property != DN_ATTRIBUTE && !attributes.contains(&config.bind_property)
			{
				attributes.push(config.bind_property.clone());
			}
			attributes
		});

		Ok(Self {
			user_search: config.user_search,
			bind_property: config.bind_property,
			user_attributes,
			privileged,
			verification,
			groups: GroupResolver::new(config.group_search),
			cache,
			events,
			closed: AtomicBool::new(false),
		})
	}

	/// Subscribe to connection failures that happen outside of any
	/// operation. Subscribers are expected to [`close`](Self::close) the
	/// authenticator in response.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
		self.events.subscribe()
	}

	/// Authenticate a user with a password, returning the user's entry.
	///
	/// The entry is looked up through the privileged connection, then the
	/// password is checked by binding as the entry on the verification
	/// connection. If group search is configured, the user's groups are
	/// attached. With caching enabled, a repeated authentication with the
	/// same password is answered without contacting the server.
	pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, Error> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::Closed);
		}
		if password.is_empty() {
			return Err(Error::EmptyPassword);
		}

		if let Some(cache) = &self.cache {
			if let Some(user) = cache.lookup(username, password).await? {
				debug!(username, "Authenticated from cache");
				return Ok(user);
			}
		}

		let user =
			self.find_user(username).await?.ok_or_else(|| Error::NoSuchUser(username.to_owned()))?;

		let identity = user
			.property(&self.bind_property)
			.ok_or_else(|| Error::MissingAttribute(self.bind_property.clone()))?;
		self.verification.verify(identity, password).await?;
		debug!(username, dn = %user.entry.dn, "Password verified");

		let user = self.groups.resolve(user, &self.privileged).await?;

		if let Some(cache) = &self.cache {
			cache.store(username, password, &user).await?;
		}
		Ok(user)
	}

	/// Find the directory entry of a user. Returns `None` if there is no
	/// entry, and fails if there is more than one.
	pub async fn find_user(&self, username: &str) -> Result<Option<User>, Error> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::Closed);
		}
		if username.is_empty() {
			return Err(Error::EmptyUsername);
		}

		let filter = filter::render(&self.user_search.filter, USERNAME_PLACEHOLDER, username);
		let request = SearchRequest::new(
			&self.user_search.base,
			self.user_search.scope,
			filter,
			self.user_attributes.as_deref(),
		);
		let mut entries = self.privileged.search(&request).await?;

		match entries.len() {
			0 => {
				debug!(username, "No such user");
				Ok(None)
			}
			1 => Ok(entries.pop().map(User::from)),
			count => Err(Error::Ambiguous { count, username: username.to_owned() }),
		}
	}

	/// Unbind both connections.
	///
	/// Authentications already in progress are not cancelled, but they fail
	/// with [`Error::Closed`] instead of opening a new connection. A
	/// connection that is being set up when `close` is called is unbound once
	/// its setup finished. An error unbinding the privileged connection is
	/// returned after the verification connection was unbound as well.
	pub async fn close(&self) -> Result<(), Error> {
		self.closed.store(true, Ordering::Release);
		let privileged = self.privileged.unbind().await;
		let verification = self.verification.unbind().await;
		info!("Authenticator closed");
		privileged.and(verification)
	}
}
