//! Authenticate users with a username and password against an LDAP directory.
//!
//! Authentication works in up to three steps. First, the entry of the user is
//! looked up with a search on a long-lived privileged connection, bound as a
//! configured search user (or anonymously). The search filter is built from a
//! template in which `{{username}}` is replaced by the escaped username.
//! Then the password is verified by binding as the found entry on a second
//! connection that is only ever used for that purpose. Finally, if a group
//! search is configured, the groups of the user are looked up and attached to
//! the result.
//!
//! Successful authentications can be cached for a few minutes. The cache
//! stores an Argon2 hash of the password rather than the password itself.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource. The site
//! "firstyear's blog-a-log" also has [a guide][firstyear] which is more
//! visually oriented and goes into more detail about searching
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//! [firstyear]: https://fy.blackhats.net.au/blog/html/pages/ldap_guide_part_1_foundations.html
//!
//! # Getting started
//! A minimal example of authenticating a user might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use ldap_authenticator::{Authenticator, Config, SearchEntryExt};
//! use url::Url;
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let mut config = Config::new(
//!     Url::parse("ldap://localhost")?,
//!     "ou=people,dc=example,dc=com",
//!     "(uid={{username}})",
//! );
//! config.bind_dn = Some("cn=admin,dc=example,dc=com".to_owned());
//! config.bind_credentials = Some("verysecret".to_owned());
//! config.cache = true;
//!
//! let authenticator = Arc::new(Authenticator::new(config)?);
//!
//! // Close the authenticator when a connection fails
//! let mut events = authenticator.subscribe();
//! let watcher = Arc::clone(&authenticator);
//! tokio::spawn(async move {
//!     if let Ok(event) = events.recv().await {
//!         eprintln!("{} connection failed: {}", event.role, event.error);
//!         let _ = watcher.close().await;
//!     }
//! });
//!
//! let user = authenticator.authenticate("riemann", "password").await?;
//! println!("Authenticated {}", user.dn());
//!
//! authenticator.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Closing the authenticator does not cancel authentications in progress,
//!   but no connection is opened once it was closed. If a connection is being
//!   established while closing, it is unbound once it has been set up.
//! * Nothing is retried. Connection failures are reported to the caller of
//!   the operation that hit them, and to subscribers of
//!   [`Authenticator::subscribe`]; the failed connection is replaced on its
//!   next use.
//! * Password verification binds are serialized on a single connection.

mod auth;
mod cache;
pub mod config;
mod connection;
pub mod directory;
pub mod entry;
pub mod error;
pub mod filter;
mod groups;
pub mod ldap;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	auth::Authenticator,
	config::{
		Config, ConnectionConfig, GroupFilter, GroupSearch, SearchScope, TLSConfig, UserSearch,
	},
	directory::{
		ConnectionEvent, ConnectionMonitor, ConnectionRole, Directory, DirectoryConnection,
		SearchRequest,
	},
	entry::{Entry, SearchEntryExt, User},
	error::Error,
	ldap::LdapDirectory,
};
