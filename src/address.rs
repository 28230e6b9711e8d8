use core::fmt::{self, Display, Formatter};

use mailparse::{MailAddr, MailAddrList, MailHeader, SingleInfo};

use crate::error::AddressError;

/// A single mail address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    display_name: Option<String>,
    address: String,
}

impl Mailbox {
    /// Parse exactly one mailbox, e.g. `relay@example.com` or
    /// `"Relay" <relay@example.com>`.
    ///
    /// # Errors
    /// If the input is not a single, well-formed address
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let mut list = Self::parse_list(input)?;

        match list.len() {
            1 => Ok(list.remove(0)),
            0 => Err(AddressError::Invalid(input.to_string())),
            count => Err(AddressError::NotSingle {
                input: input.to_string(),
                count,
            }),
        }
    }

    /// Parse an address list, flattening any groups.
    ///
    /// # Errors
    /// If the list is malformed or any entry is not a valid address
    pub fn parse_list(input: &str) -> Result<Vec<Self>, AddressError> {
        let list = mailparse::addrparse(input).map_err(|err| AddressError::Malformed {
            input: input.to_string(),
            reason: err.to_string(),
        })?;

        singles(&list).map(Self::try_from).collect()
    }

    /// Parse the mailboxes of an address header field.
    ///
    /// Encoded words are decoded per display name, so an encoded comma never
    /// splits a mailbox. Each entry is checked on its own.
    ///
    /// # Errors
    /// If the field is not an address list at all
    pub fn parse_header(
        header: &MailHeader<'_>,
    ) -> Result<Vec<Result<Self, AddressError>>, AddressError> {
        let list = mailparse::addrparse_header(header).map_err(|err| AddressError::Malformed {
            input: header.get_value(),
            reason: err.to_string(),
        })?;

        Ok(singles(&list).map(Self::try_from).collect())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether both mailboxes name the same address, ignoring case and display names.
    pub fn same_address(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

fn singles(list: &MailAddrList) -> impl Iterator<Item = SingleInfo> + '_ {
    list.iter().flat_map(|addr| match addr {
        MailAddr::Single(single) => vec![single.clone()],
        MailAddr::Group(group) => group.addrs.clone(),
    })
}

fn is_valid_address(address: &str) -> bool {
    address.rsplit_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.is_empty()
            && !address.chars().any(|c| c.is_whitespace() || c.is_control())
            && !domain.starts_with('.')
            && !domain.ends_with('.')
    })
}

impl TryFrom<SingleInfo> for Mailbox {
    type Error = AddressError;

    fn try_from(value: SingleInfo) -> Result<Self, Self::Error> {
        if is_valid_address(&value.addr) {
            Ok(Self {
                display_name: value.display_name.filter(|name| !name.trim().is_empty()),
                address: value.addr,
            })
        } else {
            Err(AddressError::Invalid(value.addr))
        }
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            None => f.write_str(&self.address),
        }
    }
}
