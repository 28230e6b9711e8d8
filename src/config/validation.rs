use std::net::IpAddr;

use crate::address::Mailbox;

/// Whether `name` is a syntactically valid DNS host name.
///
/// IP literals are not host names.
pub fn is_dns_host_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);

    if name.is_empty() || name.len() > 253 || name.parse::<IpAddr>().is_ok() {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// The lowercase hyphenated form of a GUID given in the hyphenated, simple,
/// braced or URN form.
pub fn canonical_guid(value: &str) -> Option<String> {
    uuid::Uuid::try_parse(value)
        .ok()
        .map(|guid| guid.hyphenated().to_string())
}

pub fn is_mail_address(value: &str) -> bool {
    Mailbox::parse(value).is_ok()
}

/// `None` when the value is absent or only whitespace.
pub fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}
