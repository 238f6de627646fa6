//! Caching of successfully verified credentials
//!
//! Entries hold an Argon2 hash of the password that was verified, never the
//! password itself. The salt is generated once per cache.
use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use argon2::{
	password_hash::{
		rand_core::OsRng, Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier,
		SaltString,
	},
	Argon2,
};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{entry::User, error::Error};

/// A verified credential
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
	/// PHC string of the verified password
	pub(crate) hash: String,
	/// The user returned by the verification
	pub(crate) user: User,
}

/// A cache entry and the time it was stored
#[derive(Debug)]
struct Stored {
	/// The entry
	entry: CacheEntry,
	/// When the entry was set
	stored_at: Instant,
}

/// Bounded cache of verified credentials, keyed by username.
///
/// Entries expire after a fixed time. When the cache is full, the entry that
/// was set longest ago is evicted. Reads never refresh an entry.
#[derive(Debug)]
pub(crate) struct CredentialCache {
	/// Entries in order of when they were set. Only ever read with `peek`, so
	/// the least recently used entry is the oldest one.
	entries: Mutex<LruCache<String, Stored>>,
	/// How long entries stay valid
	ttl: Duration,
	/// Hash function
	hasher: Arc<Argon2<'static>>,
	/// Salt used for all entries
	salt: SaltString,
}

impl CredentialCache {
	/// Create an empty cache.
	pub(crate) fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
		Self::with_hasher(capacity, ttl, Argon2::default())
	}

	/// Create an empty cache hashing with the given parameters.
	fn with_hasher(capacity: NonZeroUsize, ttl: Duration, hasher: Argon2<'static>) -> Self {
		Self {
			entries: Mutex::new(LruCache::new(capacity)),
			ttl,
			hasher: Arc::new(hasher),
			salt: SaltString::generate(&mut OsRng),
		}
	}

	/// Get the entry for a username, unless it has expired. Expired entries
	/// are removed.
	pub(crate) fn get(&self, username: &str) -> Option<CacheEntry> {
		let mut entries = self.entries.lock();
		let stored = entries.peek(username)?;
		if stored.stored_at.elapsed() < self.ttl {
			return Some(stored.entry.clone());
		}
		entries.pop(username);
		None
	}

	/// Store an entry for a username, replacing any previous one.
	pub(crate) fn set(&self, username: &str, entry: CacheEntry) {
		let stored = Stored { entry, stored_at: Instant::now() };
		if let Some((evicted, _)) = self.entries.lock().push(username.to_owned(), stored) {
			if evicted != username {
				tracing::debug!(username = %evicted, "Evicted cached credential");
			}
		}
	}

	/// Return the cached user if `password` matches the cached credential of
	/// `username`.
	pub(crate) async fn lookup(
		&self,
		username: &str,
		password: &str,
	) -> Result<Option<User>, Error> {
		let Some(entry) = self.get(username) else {
			return Ok(None);
		};

		let hasher = Arc::clone(&self.hasher);
		let password = password.to_owned();
		let hash = entry.hash;
		let verified = tokio::task::spawn_blocking(move || -> Result<bool, HashError> {
			let hash = PasswordHash::new(&hash)?;
			match hasher.verify_password(password.as_bytes(), &hash) {
				Ok(()) => Ok(true),
				Err(HashError::Password) => Ok(false),
				Err(err) => Err(err),
			}
		})
		.await??;

		if verified {
			Ok(Some(entry.user))
		} else {
			tracing::debug!(username, "Cached credential did not match");
			Ok(None)
		}
	}

	/// Hash `password` and cache it together with `user`.
	pub(crate) async fn store(
		&self,
		username: &str,
		password: &str,
		user: &User,
	) -> Result<(), Error> {
		let hasher = Arc::clone(&self.hasher);
		let salt = self.salt.clone();
		let password = password.to_owned();
		let hash = tokio::task::spawn_blocking(move || {
			hasher.hash_password(password.as_bytes(), &salt).map(|hash| hash.to_string())
		})
		.await??;

		self.set(username, CacheEntry { hash, user: user.clone() });
		Ok(())
	}
}
