//! Relay configuration.
//!
//! The file is read into the raw `*Options` structs, where every required
//! value is optional so that absent and malformed settings can be told apart.
//! Validation turns them into immutable `*Settings` or reports every problem
//! found.

pub mod graph;
pub mod inbound;
pub mod validation;

use serde::Deserialize;

pub use graph::{GraphEnvironment, GraphOptions, GraphSettings};
pub use inbound::{AllowedSender, AllowedSenderList, InboundOptions, InboundSettings};

use crate::{error::StartupError, events::RelayEvent, internal};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default, alias = "SmtpConfiguration")]
    pub smtp: InboundOptions,

    #[serde(default, alias = "GraphConfiguration")]
    pub graph: GraphOptions,
}

/// Both halves of a validated configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub inbound: InboundSettings,
    pub graph: GraphSettings,
}

impl RelayConfig {
    /// # Errors
    /// If the document is not valid TOML or a value has the wrong type
    pub fn from_toml(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }

    /// Validate both sections, reporting the problems of each.
    ///
    /// # Errors
    /// Every section that failed validation
    pub fn validate(&self) -> Result<Settings, StartupError> {
        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerValidating.id(),
            "Validating SMTP configuration"
        );
        let inbound = self.smtp.validate();
        match &inbound {
            Ok(settings) => internal!(
                level = DEBUG,
                event_id = RelayEvent::SmtpWorkerValidated.id(),
                "SMTP configuration valid; accepting mail from: {}",
                settings.allowed_senders
            ),
            Err(err) => internal!(
                level = ERROR,
                event_id = RelayEvent::SmtpWorkerValidationFailed.id(),
                "{err}"
            ),
        }

        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerValidating.id(),
            "Validating Graph configuration"
        );
        let graph = self.graph.validate();
        match &graph {
            Ok(settings) => internal!(
                level = DEBUG,
                event_id = RelayEvent::GraphWorkerValidated.id(),
                "Graph configuration valid; sending as {} via {}",
                settings.mail_user,
                settings.environment
            ),
            Err(err) => internal!(
                level = ERROR,
                event_id = RelayEvent::GraphWorkerValidationFailed.id(),
                "{err}"
            ),
        }

        match (inbound, graph) {
            (Ok(inbound), Ok(graph)) => Ok(Settings { inbound, graph }),
            (inbound, graph) => Err(StartupError {
                errors: [inbound.err(), graph.err()].into_iter().flatten().collect(),
            }),
        }
    }
}
