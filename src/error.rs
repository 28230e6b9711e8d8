//! Error types for the relay.
//!
//! Configuration problems are collected and reported together at startup.
//! Everything past startup is scoped to a single transaction or message and
//! never takes a worker down.

use core::fmt::{self, Display, Formatter};

use thiserror::Error;

/// A mail address that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("'{0}' is not a valid mail address")]
    Invalid(String),

    #[error("'{input}' contains {count} addresses, expected exactly one")]
    NotSingle { input: String, count: usize },

    #[error("Unable to parse address list '{input}': {reason}")]
    Malformed { input: String, reason: String },
}

/// A submitted message that could not be turned into a [`crate::message::ParsedMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageParseError {
    #[error("Message is empty")]
    Empty,

    #[error("Message has no header fields")]
    NoHeaders,

    #[error("Malformed header block: {0}")]
    Headers(String),
}

/// Errors that end an SMTP session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the client")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Relay queue is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("From address override '{0}' is not a valid mail address")]
    InvalidOverride(String),
}

/// Failures reported by an outbound transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request was abandoned before a response arrived.
    #[error("Request was canceled")]
    Canceled,

    #[error("Unable to acquire an access token: {0}")]
    Token(String),

    #[error("Invalid Graph endpoint: {0}")]
    Endpoint(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Graph rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl TransportError {
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Unexpected failures while handling a single queued message.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("Delivery panicked: {0}")]
    Panicked(String),
}

/// Every problem found in one configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct ConfigError {
    pub section: &'static str,
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl ConfigError {
    pub const fn new(section: &'static str) -> Self {
        Self {
            section,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    pub fn missing(&mut self, key: &str) {
        self.missing.push(format!("{}:{key}", self.section));
    }

    pub fn invalid(&mut self, key: &str, value: &str, reason: &str) {
        self.invalid
            .push(format!("{}:{key} ('{value}' {reason})", self.section));
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration is invalid.", self.section)?;

        if !self.missing.is_empty() {
            write!(f, " Missing: {}.", self.missing.join(", "))?;
        }

        if !self.invalid.is_empty() {
            write!(f, " Invalid: {}.", self.invalid.join(", "))?;
        }

        Ok(())
    }
}

/// All configuration sections that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct StartupError {
    pub errors: Vec<ConfigError>,
}

impl Display for StartupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Relay configuration is invalid")?;

        for error in &self.errors {
            write!(f, "\n  {error}")?;
        }

        Ok(())
    }
}
