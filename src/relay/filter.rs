use core::fmt::Debug;
use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;

use crate::{
    address::Mailbox,
    config::{AllowedSenderList, inbound::normalize_ip},
    events::RelayEvent,
    internal,
    smtp::{FilterResult, MailboxFilter, SessionContext},
};

/// Looks up the addresses a host name currently resolves to.
#[async_trait]
pub trait HostResolver: Debug + Send + Sync {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// The operating system's resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        Ok(tokio::net::lookup_host((host, 0))
            .await?
            .map(|socket| socket.ip())
            .collect())
    }
}

/// Gatekeeper for `MAIL FROM`.
///
/// Only clients on the allowed sender list may relay, and the null
/// reverse-path is never accepted since bounces have nowhere to go.
///
/// The decision rests on the peer address alone. Host name entries are
/// resolved on every check, and the name a client gives in `HELO`/`EHLO` is
/// only logged.
#[derive(Debug, Clone)]
pub struct RelayFilter {
    allowed: Option<Arc<AllowedSenderList>>,
    resolver: Arc<dyn HostResolver>,
}

impl RelayFilter {
    /// A filter with no list rejects everything.
    pub fn new(allowed: Option<Arc<AllowedSenderList>>) -> Self {
        Self {
            allowed,
            resolver: Arc::new(SystemResolver),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub async fn evaluate(&self, remote: IpAddr, sender: Option<&Mailbox>) -> FilterResult {
        if sender.is_none() {
            return FilterResult::RejectPermanently;
        }

        match &self.allowed {
            Some(allowed) if self.permits(allowed, remote).await => FilterResult::Accept,
            _ => FilterResult::RejectTemporarily,
        }
    }

    async fn permits(&self, allowed: &AllowedSenderList, remote: IpAddr) -> bool {
        if allowed.lists_address(remote) {
            return true;
        }

        let remote = normalize_ip(remote);

        for host in allowed.host_names() {
            match self.resolver.resolve(host).await {
                Ok(addresses) => {
                    if addresses.into_iter().map(normalize_ip).any(|ip| ip == remote) {
                        return true;
                    }
                }
                Err(err) => internal!(
                    level = WARN,
                    "Unable to resolve allowed sender {host}: {err}"
                ),
            }
        }

        false
    }
}

#[async_trait]
impl MailboxFilter for RelayFilter {
    async fn can_accept_from(
        &self,
        context: &SessionContext,
        sender: Option<&Mailbox>,
        size: Option<usize>,
    ) -> FilterResult {
        let remote = context.peer.ip();
        let from = sender.map_or("<>", Mailbox::address);
        let helo = context.helo.as_deref().unwrap_or("-");

        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerMessageReceived.id(),
            session = context.id,
            "Received message from {from} via {remote} (HELO {helo}, declared size: {size:?})"
        );

        let result = self.evaluate(remote, sender).await;

        match result {
            FilterResult::Accept => internal!(
                level = INFO,
                event_id = RelayEvent::SmtpWorkerMessageAccepted.id(),
                session = context.id,
                "Accepted message from {from} via {remote}"
            ),
            FilterResult::RejectPermanently => internal!(
                level = WARN,
                event_id = RelayEvent::SmtpWorkerMessageRejected.id(),
                session = context.id,
                "Rejected message via {remote}: empty sender address"
            ),
            FilterResult::RejectTemporarily if self.allowed.is_none() => internal!(
                level = WARN,
                event_id = RelayEvent::SmtpWorkerMessageRejected.id(),
                session = context.id,
                "Rejected message from {from} via {remote}: no allowed sender list is configured"
            ),
            FilterResult::RejectTemporarily => internal!(
                level = WARN,
                event_id = RelayEvent::SmtpWorkerMessageRejected.id(),
                session = context.id,
                "Rejected message from {from} via {remote} (HELO {helo}): sender is not in the allowed sender list"
            ),
        }

        result
    }
}
