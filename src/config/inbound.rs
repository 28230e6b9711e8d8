use core::fmt::{self, Display, Formatter};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    config::validation::{is_dns_host_name, present},
    error::ConfigError,
    smtp::SessionLimits,
};

pub const SECTION: &str = "smtp";

const WELL_KNOWN_PORTS: [i64; 3] = [25, 465, 587];

const fn default_max_message_size() -> usize {
    35 * 1024 * 1024
}

const fn default_command_timeout_secs() -> u64 {
    300
}

const fn default_data_timeout_secs() -> u64 {
    180
}

const fn default_intake_timeout_ms() -> u64 {
    5000
}

/// The `[smtp]` table as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundOptions {
    /// Host name announced in the greeting
    #[serde(default, alias = "ServerName")]
    pub server_name: Option<String>,

    /// 25, 465, 587, or any unprivileged port
    #[serde(default, alias = "ServerPort")]
    pub server_port: Option<i64>,

    /// IP literals and/or DNS host names permitted to submit mail
    #[serde(default, alias = "AllowedSenderAddresses")]
    pub allowed_sender_addresses: Option<Vec<String>>,

    /// Local address to bind (default: all IPv4 interfaces)
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Largest message accepted in bytes (default: 35 MiB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// How long to wait for the next command (default: 300)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// How long to wait for each line of message content (default: 180)
    #[serde(default = "default_data_timeout_secs")]
    pub data_timeout_secs: u64,

    /// Budget for parsing and queuing a received message (default: 5000)
    #[serde(default = "default_intake_timeout_ms")]
    pub intake_timeout_ms: u64,
}

impl Default for InboundOptions {
    fn default() -> Self {
        Self {
            server_name: None,
            server_port: None,
            allowed_sender_addresses: None,
            bind_address: None,
            max_message_size: default_max_message_size(),
            command_timeout_secs: default_command_timeout_secs(),
            data_timeout_secs: default_data_timeout_secs(),
            intake_timeout_ms: default_intake_timeout_ms(),
        }
    }
}

/// Validated inbound settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSettings {
    pub server_name: String,
    pub socket: SocketAddr,
    pub allowed_senders: Arc<AllowedSenderList>,
    pub limits: SessionLimits,
    pub intake_timeout: Duration,
}

impl InboundOptions {
    /// Check every setting, reporting all problems together.
    ///
    /// # Errors
    /// The collected missing and invalid settings
    pub fn validate(&self) -> Result<InboundSettings, ConfigError> {
        let mut errors = ConfigError::new(SECTION);

        let server_name = match present(self.server_name.as_ref()) {
            None => {
                errors.missing("server_name");
                None
            }
            Some(name) if !is_dns_host_name(name) => {
                errors.invalid("server_name", name, "is not a valid DNS host name");
                None
            }
            Some(name) => Some(name.to_string()),
        };

        let port = match self.server_port {
            None => {
                errors.missing("server_port");
                None
            }
            Some(port) if WELL_KNOWN_PORTS.contains(&port) || (1024..=65535).contains(&port) => {
                u16::try_from(port).ok()
            }
            Some(port) => {
                errors.invalid(
                    "server_port",
                    &port.to_string(),
                    "is not a permitted port; use 25, 465, 587 or 1024-65535",
                );
                None
            }
        };

        let bind_address = match present(self.bind_address.as_ref()) {
            None => Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Some(address) => address.parse::<IpAddr>().map_or_else(
                |_| {
                    errors.invalid("bind_address", address, "is not an IP address");
                    None
                },
                Some,
            ),
        };

        let allowed_senders = match self.allowed_sender_addresses.as_deref() {
            None | Some([]) => {
                errors.missing("allowed_sender_addresses");
                None
            }
            Some(entries) => match AllowedSenderList::try_from_entries(entries) {
                Ok(list) => Some(list),
                Err(rejected) => {
                    for entry in rejected {
                        errors.invalid(
                            "allowed_sender_addresses",
                            &entry,
                            "is not an IP address or DNS host name",
                        );
                    }
                    None
                }
            },
        };

        if self.max_message_size == 0 {
            errors.invalid("max_message_size", "0", "must be greater than zero");
        }

        match (server_name, port, bind_address, allowed_senders) {
            (Some(server_name), Some(port), Some(bind), Some(allowed)) if errors.is_empty() => {
                Ok(InboundSettings {
                    server_name,
                    socket: SocketAddr::new(bind, port),
                    allowed_senders: Arc::new(allowed),
                    limits: SessionLimits {
                        command_timeout: Duration::from_secs(self.command_timeout_secs),
                        data_timeout: Duration::from_secs(self.data_timeout_secs),
                        max_message_size: self.max_message_size,
                    },
                    intake_timeout: Duration::from_millis(self.intake_timeout_ms),
                })
            }
            _ => Err(errors),
        }
    }
}

/// One permitted submitter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllowedSender {
    Ip(IpAddr),
    Host(String),
}

impl AllowedSender {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();

        if let Ok(ip) = entry.parse::<IpAddr>() {
            return Some(Self::Ip(normalize_ip(ip)));
        }

        is_dns_host_name(entry).then(|| Self::Host(normalize_host(entry)))
    }
}

impl Display for AllowedSender {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => Display::fmt(ip, f),
            Self::Host(host) => f.write_str(host),
        }
    }
}

pub(crate) fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// The set of hosts allowed to relay mail, normalized, sorted and de-duplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedSenderList {
    entries: Box<[AllowedSender]>,
}

impl AllowedSenderList {
    /// Build the list, or return every entry that is neither an IP literal
    /// nor a DNS host name.
    ///
    /// # Errors
    /// The rejected entries
    pub fn try_from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, Vec<String>> {
        let mut accepted = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();

        for entry in entries {
            match AllowedSender::parse(entry.as_ref()) {
                Some(sender) => accepted.push(sender),
                None => rejected.push(entry.as_ref().to_string()),
            }
        }

        if !rejected.is_empty() {
            return Err(rejected);
        }

        accepted.sort();
        accepted.dedup();

        Ok(Self {
            entries: accepted.into_boxed_slice(),
        })
    }

    /// Whether `remote` is listed as an IP literal.
    pub fn lists_address(&self, remote: IpAddr) -> bool {
        let remote = normalize_ip(remote);

        self.entries
            .iter()
            .any(|entry| matches!(entry, AllowedSender::Ip(ip) if *ip == remote))
    }

    /// Host name entries. These only match a client once resolved.
    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            AllowedSender::Host(host) => Some(host.as_str()),
            AllowedSender::Ip(_) => None,
        })
    }
}

impl Display for AllowedSenderList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rendered = self
            .entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        f.write_str(&rendered)
    }
}
