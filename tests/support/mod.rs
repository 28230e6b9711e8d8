//! Test support utilities for end-to-end testing
//!
//! Runs the relay in-process against a mock Graph endpoint, so tests can follow
//! a message from SMTP submission through to the `sendMail` request.

#![allow(dead_code)]

pub mod harness;
pub mod mock_graph;
pub mod smtp_client;

pub use harness::RelayTestHarness;
pub use mock_graph::{MockGraphServer, RecordedRequest};
pub use smtp_client::SmtpTestClient;
