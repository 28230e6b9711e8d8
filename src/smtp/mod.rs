//! A small SMTP submission server.
//!
//! The engine owns sockets and the line protocol. What to accept and what to
//! do with a received message is decided by a [`MailboxFilter`] and a
//! [`MessageStore`] supplied by the caller.

use std::{borrow::Cow, net::SocketAddr, time::Duration};

use async_trait::async_trait;

use crate::address::Mailbox;

pub mod command;
pub mod listener;
pub mod session;
pub mod state;
pub mod status;

pub use listener::Listener;
pub use status::Status;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub command_timeout: Duration,
    pub data_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            data_timeout: Duration::from_secs(180),
            max_message_size: 35 * 1024 * 1024,
        }
    }
}

/// What is known about the connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub id: u64,
    pub peer: SocketAddr,
    /// The name given in `HELO`/`EHLO`, once received
    pub helo: Option<String>,
}

impl SessionContext {
    pub const fn new(id: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            helo: None,
        }
    }
}

/// The envelope of the mail transaction in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// `None` for the null reverse-path (`MAIL FROM:<>`)
    pub sender: Option<Mailbox>,
    pub recipients: Vec<Mailbox>,
    /// The `SIZE=` parameter of `MAIL FROM`, if given
    pub declared_size: Option<usize>,
}

/// Message content as received, in chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuffer {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl MessageBuffer {
    pub fn push(&mut self, data: &[u8]) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() + data.len() <= CHUNK_SIZE => chunk.extend_from_slice(data),
            _ => self.chunks.push(data.to_vec()),
        }
        self.len += data.len();
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Join every chunk into a single buffer.
    pub fn into_contiguous(self) -> Vec<u8> {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }

        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

impl From<&[u8]> for MessageBuffer {
    fn from(value: &[u8]) -> Self {
        let mut buffer = Self::default();
        for chunk in value.chunks(CHUNK_SIZE) {
            buffer.push(chunk);
        }
        buffer
    }
}

/// A reply line (or lines) sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub lines: Vec<Cow<'static, str>>,
}

impl Reply {
    pub fn new(status: Status, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            lines: vec![text.into()],
        }
    }

    pub fn ok(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Status::Ok, text)
    }

    pub fn temporary(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Status::ActionUnavailable, text)
    }

    pub fn permanent(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Status::TransactionFailed, text)
    }

    #[must_use]
    pub fn with_line(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.lines.push(text.into());
        self
    }

    /// Wire form, one `CRLF` terminated line per entry.
    pub fn render(&self) -> String {
        let last = self.lines.len().saturating_sub(1);

        self.lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let sep = if idx == last { ' ' } else { '-' };
                format!("{}{sep}{line}\r\n", self.status)
            })
            .collect()
    }
}

/// Outcome of a [`MailboxFilter`] decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Accept,
    RejectTemporarily,
    RejectPermanently,
}

/// Decides whether a transaction may begin.
#[async_trait]
pub trait MailboxFilter: Send + Sync {
    async fn can_accept_from(
        &self,
        context: &SessionContext,
        sender: Option<&Mailbox>,
        size: Option<usize>,
    ) -> FilterResult;
}

/// Takes ownership of a fully received message.
///
/// The returned reply is sent to the client as the response to the end of
/// `DATA`, so it must only report success once the message is safe.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(
        &self,
        context: &SessionContext,
        transaction: &Transaction,
        buffer: MessageBuffer,
    ) -> Reply;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_rendering() {
        assert_eq!(Reply::ok("Ok").render(), "250 Ok\r\n");
        assert_eq!(
            Reply::ok("relay.contoso.com").with_line("SIZE 100").with_line("8BITMIME").render(),
            "250-relay.contoso.com\r\n250-SIZE 100\r\n250 8BITMIME\r\n"
        );
    }

    #[test]
    fn buffer_chunks_large_input() {
        let data = vec![b'x'; CHUNK_SIZE * 2 + 10];
        let buffer = MessageBuffer::from(data.as_slice());

        assert_eq!(buffer.chunks.len(), 3);
        assert_eq!(buffer.len(), data.len());
        assert_eq!(buffer.into_contiguous(), data);
    }

    #[test]
    fn buffer_coalesces_small_pushes() {
        let mut buffer = MessageBuffer::default();
        buffer.push(b"Subject: hi\r\n");
        buffer.push(b"\r\n");
        buffer.push(b"body\r\n");

        assert_eq!(buffer.chunks.len(), 1);
        assert_eq!(buffer.into_contiguous(), b"Subject: hi\r\n\r\nbody\r\n");
    }
}
