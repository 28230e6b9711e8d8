//! End-to-end test harness for the relay
//!
//! Starts both relay workers on a random local port, delivering through a real
//! [`GraphTransport`] pointed at a [`MockGraphServer`].
//!
//! ```no_run
//! let harness = RelayTestHarness::builder().build().await;
//! let mut client = harness.connect().await.unwrap();
//! client.send_message("app01", "app@contoso.com", &["user@contoso.com"], "Subject: Hi\r\n\r\nHello").await.unwrap();
//! let stats = harness.shutdown().await.unwrap();
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use graph_relay::{
    config::{AllowedSenderList, GraphEnvironment, GraphSettings, InboundSettings, Settings},
    controller,
    delivery::{DeliveryStats, GraphTransport},
    smtp::SessionLimits,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time::timeout};

use super::{
    mock_graph::{MockGraphServer, TENANT},
    smtp_client::SmtpTestClient,
};

pub const MAIL_USER: &str = "relay@contoso.com";

pub struct RelayTestHarness {
    smtp_addr: SocketAddr,
    mock_graph: Arc<MockGraphServer>,
    relay_handle: JoinHandle<anyhow::Result<DeliveryStats>>,
    shutdown_tx: oneshot::Sender<()>,
}

impl RelayTestHarness {
    pub fn builder() -> RelayTestHarnessBuilder {
        RelayTestHarnessBuilder::default()
    }

    pub const fn smtp_addr(&self) -> SocketAddr {
        self.smtp_addr
    }

    /// The mock Graph endpoint, which stays readable after [`Self::shutdown`].
    pub fn graph(&self) -> Arc<MockGraphServer> {
        self.mock_graph.clone()
    }

    pub async fn connect(&self) -> anyhow::Result<SmtpTestClient> {
        SmtpTestClient::connect(self.smtp_addr).await
    }

    /// Stop accepting mail and wait for the queue to drain.
    ///
    /// # Errors
    /// If the relay failed, or took more than five seconds to stop
    pub async fn shutdown(self) -> anyhow::Result<DeliveryStats> {
        let _ = self.shutdown_tx.send(());

        let stats = timeout(Duration::from_secs(5), self.relay_handle).await???;
        self.mock_graph.shutdown();

        Ok(stats)
    }
}

pub struct RelayTestHarnessBuilder {
    allowed_senders: Vec<String>,
    from_override: Option<String>,
    send_statuses: Vec<u16>,
    limits: SessionLimits,
    request_timeout: Duration,
}

impl Default for RelayTestHarnessBuilder {
    fn default() -> Self {
        Self {
            allowed_senders: vec!["127.0.0.1".to_string()],
            from_override: None,
            send_statuses: Vec::new(),
            limits: SessionLimits {
                command_timeout: Duration::from_secs(5),
                data_timeout: Duration::from_secs(5),
                ..SessionLimits::default()
            },
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RelayTestHarnessBuilder {
    #[must_use]
    pub fn with_allowed_senders(mut self, senders: &[&str]) -> Self {
        self.allowed_senders = senders.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_from_override(mut self, address: &str) -> Self {
        self.from_override = Some(address.to_string());
        self
    }

    /// Statuses for the first `sendMail` requests; later ones get `202`.
    #[must_use]
    pub fn with_send_statuses(mut self, statuses: &[u16]) -> Self {
        self.send_statuses = statuses.to_vec();
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.limits.max_message_size = size;
        self
    }

    /// # Panics
    /// If the relay cannot be started
    pub async fn build(self) -> RelayTestHarness {
        let mock_graph = MockGraphServer::with_send_statuses(self.send_statuses).await;

        let socket = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind relay socket");
        let smtp_addr = socket.local_addr().expect("Relay socket address");

        let graph = GraphSettings {
            tenant_id: TENANT.to_string(),
            client_id: "0b7d6f1d-3c2a-4d53-9a4e-2f8f6a1c8b1e".to_string(),
            client_secret: "s3cr3t".to_string(),
            mail_user: MAIL_USER.to_string(),
            environment: GraphEnvironment::Global,
            from_override: self.from_override,
            http_response_capture: true,
            request_timeout: self.request_timeout,
        };

        let transport = GraphTransport::new(&graph)
            .expect("Failed to build Graph transport")
            .with_endpoints(mock_graph.endpoints());

        let settings = Settings {
            inbound: InboundSettings {
                server_name: "relay.test.local".to_string(),
                socket: smtp_addr,
                allowed_senders: Arc::new(
                    AllowedSenderList::try_from_entries(&self.allowed_senders)
                        .expect("Invalid allowed senders"),
                ),
                limits: self.limits,
                intake_timeout: Duration::from_secs(5),
            },
            graph,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let relay_handle = tokio::spawn(controller::serve(
            settings,
            Arc::new(transport),
            socket,
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        RelayTestHarness {
            smtp_addr,
            mock_graph: Arc::new(mock_graph),
            relay_handle,
            shutdown_tx,
        }
    }
}
