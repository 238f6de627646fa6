//! Directory entries returned to callers, and helper methods for extracting
//! data from them.
use std::collections::HashMap;

use ldap3::SearchEntry;
use serde::Serialize;

use crate::config::DN_ATTRIBUTE;

/// Attribute values of an entry in binary form, keyed by attribute name.
pub type RawAttributes = HashMap<String, Vec<Vec<u8>>>;

/// An extension trait for entries that provides convenience methods for
/// extracting data.
pub trait SearchEntryExt {
	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str>;

	/// Get the first value of an attribute, in binary form
	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]>;

	/// The distinguished name of the entry.
	fn dn(&self) -> &str;

	/// Get the first value of an attribute, where `dn` refers to the
	/// distinguished name of the entry.
	fn property(&self, attr: &str) -> Option<&str> {
		if attr == DN_ATTRIBUTE {
			return Some(self.dn());
		}
		self.attr_first(attr)
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		let attr = self.attrs.get(attr)?;
		attr.first().map(String::as_str)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(attr) = self.attrs.get(attr) {
			return attr.first().map(String::as_bytes);
		}

		if let Some(attr) = self.bin_attrs.get(attr) {
			return attr.first().map(Vec::as_slice);
		}
		None
	}

	fn dn(&self) -> &str {
		&self.dn
	}
}

/// A directory entry as returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
	/// The distinguished name of the entry
	pub dn: String,
	/// Attributes with UTF-8 values
	#[serde(flatten)]
	pub attrs: HashMap<String, Vec<String>>,
	/// Attributes with at least one value that is not valid UTF-8
	#[serde(skip)]
	pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
	/// The unprocessed bytes of every attribute value. Only present if raw
	/// attributes were requested in the configuration.
	#[serde(rename = "_raw", skip_serializing_if = "Option::is_none")]
	pub raw: Option<RawAttributes>,
}

impl Entry {
	/// Convert a search result, optionally keeping a binary copy of every
	/// attribute.
	#[must_use]
	pub fn from_search(entry: SearchEntry, include_raw: bool) -> Self {
		let raw = include_raw.then(|| {
			let mut raw: RawAttributes = entry
				.attrs
				.iter()
				.map(|(name, values)| {
					(name.clone(), values.iter().map(|value| value.as_bytes().to_vec()).collect())
				})
				.collect();
			for (name, values) in &entry.bin_attrs {
				raw.entry(name.clone()).or_default().extend(values.iter().cloned());
			}
			raw
		});
		Self { dn: entry.dn, attrs: entry.attrs, bin_attrs: entry.bin_attrs, raw }
	}
}

impl SearchEntryExt for Entry {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attrs.get(attr)?.first().map(String::as_str)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(attr) = self.attrs.get(attr) {
			return attr.first().map(String::as_bytes);
		}
		self.bin_attrs.get(attr)?.first().map(Vec::as_slice)
	}

	fn dn(&self) -> &str {
		&self.dn
	}
}

/// An authenticated user.
///
/// Serializes to a flat map of attributes, with the resolved groups under
/// `_groups` if group resolution is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
	/// The directory entry of the user
	#[serde(flatten)]
	pub entry: Entry,
	/// Entries of the groups the user is a member of
	#[serde(rename = "_groups", skip_serializing_if = "Option::is_none")]
	pub groups: Option<Vec<Entry>>,
}

impl From<Entry> for User {
	fn from(entry: Entry) -> Self {
		Self { entry, groups: None }
	}
}

impl SearchEntryExt for User {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.entry.attr_first(attr)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		self.entry.bin_attr_first(attr)
	}

	fn dn(&self) -> &str {
		&self.entry.dn
	}
}
