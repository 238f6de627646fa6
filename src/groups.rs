//! Resolution of the groups a user is a member of
use crate::{
	config::{GroupFilter, GroupSearch},
	connection::PrivilegedConnection,
	directory::SearchRequest,
	entry::{SearchEntryExt, User},
	error::Error,
	filter::{self, DN_PLACEHOLDER},
};

/// How the groups of an authenticated user are determined.
#[derive(Debug)]
pub(crate) enum GroupResolver {
	/// Groups are not resolved, users are passed through unchanged.
	Disabled,
	/// Groups are looked up with a second search.
	Search(GroupSearch),
}

impl GroupResolver {
	/// Select the resolver for the given group search configuration.
	pub(crate) fn new(search: Option<GroupSearch>) -> Self {
		search.map_or(Self::Disabled, Self::Search)
	}

	/// Attach the groups of `user` to it.
	pub(crate) async fn resolve(
		&self,
		mut user: User,
		connection: &PrivilegedConnection,
	) -> Result<User, Error> {
		let Self::Search(search) = self else {
			return Ok(user);
		};
		let filter = group_filter(search, &user)?;
		let request =
			SearchRequest::new(&search.base, search.scope, filter, search.attributes.as_deref());
		let groups = connection.search(&request).await?;
		tracing::debug!(dn = %user.entry.dn, "Found {} groups", groups.len());
		user.groups = Some(groups);
		Ok(user)
	}
}

/// Build the group search filter for a user.
fn group_filter(search: &GroupSearch, user: &User) -> Result<String, Error> {
	match &search.filter {
		GroupFilter::Template(template) => {
			let value = user
				.property(&search.dn_property)
				.ok_or_else(|| Error::MissingAttribute(search.dn_property.clone()))?;
			Ok(filter::render(template, DN_PLACEHOLDER, value))
		}
		GroupFilter::Function(build) => Ok(build(user)),
	}
}
