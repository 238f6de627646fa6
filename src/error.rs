//! Error codes

use ldap3::LdapError;

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The configuration is unusable. Raised when constructing an
	/// [`Authenticator`](crate::Authenticator), never retried.
	#[error("Invalid configuration: {0}")]
	Config(String),
	/// An empty username was passed to the user search.
	#[error("Username must not be empty")]
	EmptyUsername,
	/// An empty password was passed to `authenticate`.
	#[error("No password given")]
	EmptyPassword,
	/// The user search returned no entries.
	#[error("no such user: \"{0}\"")]
	NoSuchUser(String),
	/// The user search returned more than one entry, which means the search
	/// filter or the directory contents are broken.
	#[error("unexpected number of matches ({count}) for \"{username}\" username")]
	Ambiguous {
		/// Number of entries the search returned
		count: usize,
		/// The username that was searched for
		username: String,
	},
	/// An entry did not carry an attribute required for binding or group
	/// resolution.
	#[error("Missing attribute {0}")]
	MissingAttribute(String),
	/// Binding as the user with the supplied password failed.
	#[error("Password verification failed: {0}")]
	Verification(#[source] LdapError),
	/// An underlying protocol error or similar occurred on the privileged
	/// connection, or the LDAP library was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] LdapError),
	/// Hashing or verifying a cached password failed.
	#[error("Password hashing failed: {0}")]
	Hash(#[from] argon2::password_hash::Error),
	/// A blocking hashing task panicked or was cancelled.
	#[error("Hashing task failed: {0}")]
	Task(#[from] tokio::task::JoinError),
	/// The contents of a TLS file did not conform to the expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// Reading TLS material from disk failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// The TLS client configuration was rejected.
	#[error(transparent)]
	Tls(#[from] rustls::Error),
	/// `authenticate` was called after `close`.
	#[error("Authenticator has been closed")]
	Closed,
}
