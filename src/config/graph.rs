use core::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};
use std::time::Duration;

use serde::Deserialize;

use crate::{
    config::validation::{canonical_guid, is_mail_address, present},
    error::ConfigError,
};

pub const SECTION: &str = "graph";

const fn default_request_timeout_secs() -> u64 {
    100
}

/// The national cloud hosting the Graph tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphEnvironment {
    Global,
    UsGovL4,
    UsGovL5,
    China,
}

impl GraphEnvironment {
    pub const ALL: [Self; 4] = [Self::Global, Self::UsGovL4, Self::UsGovL5, Self::China];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Global => "GraphGlobal",
            Self::UsGovL4 => "GraphUSGovL4",
            Self::UsGovL5 => "GraphUSGovL5",
            Self::China => "GraphChina",
        }
    }

    /// Identity platform host issuing tokens for this cloud.
    pub const fn authority(self) -> &'static str {
        match self {
            Self::Global => "https://login.microsoftonline.com",
            Self::UsGovL4 | Self::UsGovL5 => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
        }
    }

    pub const fn graph_root(self) -> &'static str {
        match self {
            Self::Global => "https://graph.microsoft.com",
            Self::UsGovL4 => "https://graph.microsoft.us",
            Self::UsGovL5 => "https://dod-graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }

    pub fn graph_base(self) -> String {
        format!("{}/v1.0", self.graph_root())
    }

    /// OAuth scope requesting every application permission granted to the client.
    pub fn scope(self) -> String {
        format!("{}/.default", self.graph_root())
    }
}

impl FromStr for GraphEnvironment {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.name().eq_ignore_ascii_case(value.trim()))
            .ok_or(())
    }
}

impl Display for GraphEnvironment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `[graph]` table as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphOptions {
    #[serde(default, alias = "AzureTenantId")]
    pub azure_tenant_id: Option<String>,

    #[serde(default, alias = "AzureClientId")]
    pub azure_client_id: Option<String>,

    #[serde(default, alias = "AzureClientSecret")]
    pub azure_client_secret: Option<String>,

    /// Object id or user principal name of the mailbox sending on behalf of the relay
    #[serde(default, alias = "AzureMailUser")]
    pub azure_mail_user: Option<String>,

    #[serde(default, alias = "GraphEnvironmentName")]
    pub graph_environment_name: Option<String>,

    /// When set, replaces the Sender (or single From) address of every message
    #[serde(default, alias = "FromAddressOverride", alias = "AzureFromAddressOverride")]
    pub from_address_override: Option<String>,

    /// Log the status and body of every Graph response at debug level
    #[serde(default, alias = "HttpResponseCapture")]
    pub http_response_capture: bool,

    /// Upper bound on a single send, after which it counts as canceled (default: 100)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            azure_tenant_id: None,
            azure_client_id: None,
            azure_client_secret: None,
            azure_mail_user: None,
            graph_environment_name: None,
            from_address_override: None,
            http_response_capture: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Validated outbound settings.
#[derive(Clone, PartialEq, Eq)]
pub struct GraphSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub mail_user: String,
    pub environment: GraphEnvironment,
    pub from_override: Option<String>,
    pub http_response_capture: bool,
    pub request_timeout: Duration,
}

impl Debug for GraphSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("mail_user", &self.mail_user)
            .field("environment", &self.environment)
            .field("from_override", &self.from_override)
            .field("http_response_capture", &self.http_response_capture)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn required_guid(errors: &mut ConfigError, key: &str, value: Option<&String>) -> Option<String> {
    match present(value) {
        None => {
            errors.missing(key);
            None
        }
        Some(value) => canonical_guid(value).or_else(|| {
            errors.invalid(key, value, "is not a GUID");
            None
        }),
    }
}

impl GraphOptions {
    /// Check every setting, reporting all problems together.
    ///
    /// # Errors
    /// The collected missing and invalid settings
    pub fn validate(&self) -> Result<GraphSettings, ConfigError> {
        let mut errors = ConfigError::new(SECTION);

        let tenant_id = required_guid(&mut errors, "azure_tenant_id", self.azure_tenant_id.as_ref());
        let client_id = required_guid(&mut errors, "azure_client_id", self.azure_client_id.as_ref());

        let client_secret = present(self.azure_client_secret.as_ref()).map(str::to_string);
        if client_secret.is_none() {
            errors.missing("azure_client_secret");
        }

        let mail_user = match present(self.azure_mail_user.as_ref()) {
            None => {
                errors.missing("azure_mail_user");
                None
            }
            Some(user) => match canonical_guid(user) {
                Some(object_id) => Some(object_id),
                None if is_mail_address(user) => Some(user.to_string()),
                None => {
                    errors.invalid(
                        "azure_mail_user",
                        user,
                        "is not an object id or user principal name",
                    );
                    None
                }
            },
        };

        let environment = match present(self.graph_environment_name.as_ref()) {
            None => {
                errors.missing("graph_environment_name");
                None
            }
            Some(name) => name.parse::<GraphEnvironment>().map_or_else(
                |()| {
                    let names = GraphEnvironment::ALL.map(GraphEnvironment::name).join(", ");
                    errors.invalid(
                        "graph_environment_name",
                        name,
                        &format!("is not one of {names}"),
                    );
                    None
                },
                Some,
            ),
        };

        let from_override = match present(self.from_address_override.as_ref()) {
            None => None,
            Some(address) if !is_mail_address(address) => {
                errors.invalid(
                    "from_address_override",
                    address,
                    "is not a valid mail address",
                );
                None
            }
            Some(address) => Some(address.to_string()),
        };

        match (tenant_id, client_id, client_secret, mail_user, environment) {
            (Some(tenant_id), Some(client_id), Some(client_secret), Some(mail_user), Some(environment))
                if errors.is_empty() =>
            {
                Ok(GraphSettings {
                    tenant_id,
                    client_id,
                    client_secret,
                    mail_user,
                    environment,
                    from_override,
                    http_response_capture: self.http_response_capture,
                    request_timeout: Duration::from_secs(self.request_timeout_secs),
                })
            }
            _ => Err(errors),
        }
    }
}
