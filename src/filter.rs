//! Escaping of untrusted input for use in search filters.
//!
//! Values are escaped as described in [RFC 4515 section 3], by replacing a
//! character with a backslash followed by its two-digit hex code. On top of
//! the characters the RFC requires, `/` is escaped as well, since filter
//! templates sometimes end up in contexts where it is significant.
//!
//! [RFC 4515 section 3]: https://www.rfc-editor.org/rfc/rfc4515#section-3

/// Placeholder in the user search filter that is replaced by the username.
pub const USERNAME_PLACEHOLDER: &str = "{{username}}";

/// Placeholder in the group search filter that is replaced by the user's DN.
pub const DN_PLACEHOLDER: &str = "{{dn}}";

/// Escape `value` so that it can be interpolated into a search filter.
#[must_use]
pub fn escape(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			'\\' => escaped.push_str("\\5c"),
			'*' => escaped.push_str("\\2a"),
			'(' => escaped.push_str("\\28"),
			')' => escaped.push_str("\\29"),
			'\0' => escaped.push_str("\\00"),
			'/' => escaped.push_str("\\2f"),
			c => escaped.push(c),
		}
	}
	escaped
}

/// Replace every occurrence of `placeholder` in `template` with the escaped
/// `value`.
#[must_use]
pub fn render(template: &str, placeholder: &str, value: &str) -> String {
	template.replace(placeholder, &escape(value))
}
