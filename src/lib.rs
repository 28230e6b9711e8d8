//! An SMTP to Microsoft Graph mail relay.
//!
//! Mail is accepted over SMTP from a fixed set of trusted senders, parsed, and
//! placed on an in-process queue. A single delivery worker drains that queue and
//! submits every message through the Graph `sendMail` endpoint.

pub mod address;
pub mod config;
pub mod controller;
pub mod delivery;
pub mod error;
pub mod events;
pub mod logging;
pub mod message;
pub mod queue;
pub mod relay;
pub mod smtp;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
