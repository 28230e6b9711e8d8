use core::fmt::{self, Display, Formatter};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use mailparse::MailHeader;
use uuid::Uuid;

use crate::{
    address::Mailbox,
    error::{AddressError, MessageParseError},
};

/// Identifies one accepted message for the rest of its life in the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0.hyphenated(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderField {
    name: String,
    value: Vec<u8>,
}

impl HeaderField {
    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// An address header entry left out of a [`ParsedMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredAddress {
    pub header: &'static str,
    pub reason: AddressError,
}

/// A parsed submission.
///
/// The original header block and body are retained verbatim; only the
/// `Sender` and `From` fields are regenerated on serialization, and only if
/// they were changed after parsing.
///
/// Address headers are read leniently. Entries that are not valid mailboxes
/// are recorded in [`Self::ignored_addresses`] and otherwise skipped, so an
/// unreadable `Sender` counts as absent and an unreadable `From` contributes
/// no mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    headers: Vec<HeaderField>,
    body: Vec<u8>,
    sender: Option<Mailbox>,
    from: Vec<Mailbox>,
    to: Vec<Mailbox>,
    ignored: Vec<IgnoredAddress>,
    sender_changed: bool,
    from_changed: bool,
}

fn mailboxes(
    header: &MailHeader<'_>,
    name: &'static str,
    ignored: &mut Vec<IgnoredAddress>,
) -> Vec<Mailbox> {
    if header.get_value().trim().is_empty() {
        return Vec::new();
    }

    let entries = match Mailbox::parse_header(header) {
        Ok(entries) => entries,
        Err(reason) => {
            ignored.push(IgnoredAddress { header: name, reason });
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .map_err(|reason| ignored.push(IgnoredAddress { header: name, reason }))
                .ok()
        })
        .collect()
}

impl ParsedMessage {
    /// Parse a complete RFC 5322 message.
    ///
    /// # Errors
    /// If the message is empty or has no readable header block
    pub fn parse(raw: &[u8]) -> Result<Self, MessageParseError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(MessageParseError::Empty);
        }

        let (parsed, body_offset) =
            mailparse::parse_headers(raw).map_err(|err| MessageParseError::Headers(err.to_string()))?;

        if parsed.is_empty() {
            return Err(MessageParseError::NoHeaders);
        }

        let mut sender = None;
        let mut from = Vec::new();
        let mut to = Vec::new();
        let mut ignored = Vec::new();

        for header in &parsed {
            let key = header.get_key_ref();

            if key.eq_ignore_ascii_case("Sender") && sender.is_none() {
                sender = mailboxes(header, "Sender", &mut ignored).into_iter().next();
            } else if key.eq_ignore_ascii_case("From") {
                from.extend(mailboxes(header, "From", &mut ignored));
            } else if key.eq_ignore_ascii_case("To") {
                to.extend(mailboxes(header, "To", &mut ignored));
            }
        }

        let headers = parsed
            .iter()
            .map(|header| HeaderField {
                name: header.get_key(),
                value: header.get_value_raw().to_vec(),
            })
            .collect();

        Ok(Self {
            headers,
            body: raw.get(body_offset..).unwrap_or_default().to_vec(),
            sender,
            from,
            to,
            ignored,
            sender_changed: false,
            from_changed: false,
        })
    }

    pub fn sender(&self) -> Option<&Mailbox> {
        self.sender.as_ref()
    }

    pub fn from(&self) -> &[Mailbox] {
        &self.from
    }

    pub fn to(&self) -> &[Mailbox] {
        &self.to
    }

    pub fn ignored_addresses(&self) -> &[IgnoredAddress] {
        &self.ignored
    }

    pub fn set_sender(&mut self, sender: Mailbox) {
        self.sender = Some(sender);
        self.sender_changed = true;
    }

    pub fn set_from(&mut self, from: Vec<Mailbox>) {
        self.from = from;
        self.from_changed = true;
    }

    /// The first value of the named header, decoded.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.iter().find(|field| field.is(name)).map(|field| {
            String::from_utf8_lossy(&field.value)
                .split(['\r', '\n'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    /// The address the message claims to be sent by, for logging.
    pub fn originator(&self) -> String {
        self.sender.as_ref().map_or_else(
            || join(&self.from),
            |sender| sender.address().to_string(),
        )
    }

    pub fn recipients(&self) -> String {
        join(&self.to)
    }

    /// Serialize back to MIME.
    pub fn to_mime(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 1024);
        let mut sender_written = false;
        let mut from_written = false;

        for field in &self.headers {
            if self.sender_changed && field.is("Sender") {
                if !sender_written {
                    self.write_sender(&mut out);
                    sender_written = true;
                }
            } else if self.from_changed && field.is("From") {
                if !from_written {
                    self.write_from(&mut out);
                    from_written = true;
                }
            } else {
                out.extend_from_slice(field.name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(&field.value);
                out.extend_from_slice(b"\r\n");
            }
        }

        if self.from_changed && !from_written {
            self.write_from(&mut out);
        }

        if self.sender_changed && !sender_written {
            self.write_sender(&mut out);
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// The MIME serialization, base64 encoded.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_mime())
    }

    fn write_sender(&self, out: &mut Vec<u8>) {
        if let Some(sender) = &self.sender {
            out.extend_from_slice(format!("Sender: {sender}\r\n").as_bytes());
        }
    }

    fn write_from(&self, out: &mut Vec<u8>) {
        if !self.from.is_empty() {
            out.extend_from_slice(format!("From: {}\r\n", join(&self.from)).as_bytes());
        }
    }
}

fn join(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One item on the relay queue.
#[derive(Debug)]
pub struct QueueEntry {
    pub id: MessageId,
    pub message: ParsedMessage,
}

impl QueueEntry {
    pub const fn new(id: MessageId, message: ParsedMessage) -> Self {
        Self { id, message }
    }
}
