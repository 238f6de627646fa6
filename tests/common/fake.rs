//! In-memory directory for exercising the authenticator without a server.
use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use async_trait::async_trait;
use ldap3::{LdapError, LdapResult, SearchEntry};
use ldap_authenticator::{
	ConnectionMonitor, ConnectionRole, Directory, DirectoryConnection, Error, SearchRequest,
};
use parking_lot::Mutex;

pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
pub const ADMIN_PASSWORD: &str = "adminpassword";
pub const USER_BASE: &str = "ou=people,dc=example,dc=com";
pub const GROUP_BASE: &str = "ou=groups,dc=example,dc=com";

/// Everything the fake server knows and everything it was asked to do.
#[derive(Debug, Default)]
pub struct State {
	/// Search results, keyed by filter
	pub results: HashMap<String, Vec<SearchEntry>>,
	/// Filters whose search fails
	pub failing_filters: HashSet<String>,
	/// Passwords, keyed by DN
	pub passwords: HashMap<String, String>,
	/// Whether unbinding fails
	pub failing_unbinds: bool,
	/// Roles of the connections opened, in order
	pub connects: Vec<ConnectionRole>,
	/// Bind requests with the role of the connection they were sent on
	pub binds: Vec<(ConnectionRole, String)>,
	/// Search requests
	pub searches: Vec<SearchRequest>,
	/// Unbind requests
	pub unbinds: Vec<ConnectionRole>,
	/// Monitors of every connection opened
	pub monitors: Vec<ConnectionMonitor>,
}

impl State {
	/// Number of network operations performed so far
	pub fn operations(&self) -> usize {
		self.connects.len() + self.binds.len() + self.searches.len() + self.unbinds.len()
	}

	/// Binds sent on connections with the given role
	pub fn binds_on(&self, role: ConnectionRole) -> Vec<&str> {
		self.binds.iter().filter(|(r, _)| *r == role).map(|(_, dn)| dn.as_str()).collect()
	}
}

#[derive(Debug, Clone, Default)]
pub struct FakeDirectory {
	pub state: Arc<Mutex<State>>,
}

impl FakeDirectory {
	/// A directory with the admin user and the given people.
	pub fn with_people(people: &[(&str, &str)]) -> Self {
		let directory = Self::default();
		{
			let mut state = directory.state.lock();
			state.passwords.insert(ADMIN_DN.to_owned(), ADMIN_PASSWORD.to_owned());
			for (uid, password) in people {
				let entry = person(uid);
				state.passwords.insert(entry.dn.clone(), (*password).to_owned());
				state.results.insert(format!("(uid={uid})"), vec![entry]);
			}
		}
		directory
	}
}

/// The entry of a person
pub fn person(uid: &str) -> SearchEntry {
	SearchEntry {
		dn: format!("uid={uid},{USER_BASE}"),
		attrs: HashMap::from([
			("uid".to_owned(), vec![uid.to_owned()]),
			("cn".to_owned(), vec![format!("Bernhard {uid}")]),
			("objectClass".to_owned(), vec!["inetOrgPerson".to_owned()]),
		]),
		bin_attrs: HashMap::new(),
	}
}

/// The entry of a group
pub fn group(cn: &str) -> SearchEntry {
	SearchEntry {
		dn: format!("cn={cn},{GROUP_BASE}"),
		attrs: HashMap::from([("cn".to_owned(), vec![cn.to_owned()])]),
		bin_attrs: HashMap::new(),
	}
}

/// An error carrying an LDAP result code
pub fn result_error(rc: u32, text: &str) -> LdapError {
	LdapError::LdapResult {
		result: LdapResult {
			rc,
			matched: String::new(),
			text: text.to_owned(),
			refs: Vec::new(),
			ctrls: Vec::new(),
		},
	}
}

#[async_trait]
impl Directory for FakeDirectory {
	async fn connect(
		&self,
		monitor: ConnectionMonitor,
	) -> Result<Arc<dyn DirectoryConnection>, Error> {
		let role = monitor.role();
		let mut state = self.state.lock();
		state.connects.push(role);
		state.monitors.push(monitor);
		Ok(Arc::new(FakeConnection { role, state: Arc::clone(&self.state) }))
	}
}

#[derive(Debug)]
struct FakeConnection {
	role: ConnectionRole,
	state: Arc<Mutex<State>>,
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
	async fn bind(&self, dn: &str, password: &str) -> Result<(), LdapError> {
		let mut state = self.state.lock();
		state.binds.push((self.role, dn.to_owned()));
		match state.passwords.get(dn) {
			Some(expected) if expected == password => Ok(()),
			_ => Err(result_error(49, "Invalid credentials")),
		}
	}

	async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, LdapError> {
		let mut state = self.state.lock();
		state.searches.push(request.clone());
		if state.failing_filters.contains(&request.filter) {
			return Err(result_error(11, "Administrative limit exceeded"));
		}
		Ok(state.results.get(&request.filter).cloned().unwrap_or_default())
	}

	async fn unbind(&self) -> Result<(), LdapError> {
		let mut state = self.state.lock();
		state.unbinds.push(self.role);
		if state.failing_unbinds {
			return Err(result_error(80, "Other"));
		}
		Ok(())
	}
}
