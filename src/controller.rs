use std::{future::Future, path::Path, sync::Arc};

use tokio::{
    net::TcpListener,
    sync::{Notify, broadcast},
};

use crate::{
    Signal,
    config::{RelayConfig, Settings},
    delivery::{DeliveryStats, GraphTransport, MailTransport, OutboundWorker},
    internal, logging, queue,
    relay::InboundWorker,
};

/// The relay process: one inbound SMTP worker and one outbound Graph worker
/// joined by the relay queue.
#[derive(Debug, Default)]
pub struct Relay {
    config: RelayConfig,
}

impl From<RelayConfig> for Relay {
    fn from(config: RelayConfig) -> Self {
        Self { config }
    }
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Relay {
    /// # Errors
    /// If the document is not valid TOML or a value has the wrong type
    pub fn from_toml(document: &str) -> anyhow::Result<Self> {
        Ok(Self::from(RelayConfig::from_toml(document)?))
    }

    /// # Errors
    /// If the file cannot be read or is not a valid configuration document
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let document = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config from {}: {e}", path.display()))?;

        Self::from_toml(&document)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// Run the relay until CTRL+C or SIGTERM.
    ///
    /// Neither worker is started unless the whole configuration is valid and
    /// the SMTP socket could be bound.
    ///
    /// # Errors
    /// Configuration problems, a socket that cannot be bound, or a worker that
    /// stopped unexpectedly
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!(level = INFO, "Relay starting");

        let settings = self.config.validate().map_err(|err| {
            internal!(level = ERROR, "Relay not started: {err}");
            anyhow::anyhow!(err)
        })?;

        let transport = Arc::new(GraphTransport::new(&settings.graph)?);
        let socket = TcpListener::bind(settings.inbound.socket)
            .await
            .map_err(|err| {
                anyhow::anyhow!("Unable to listen on {}: {err}", settings.inbound.socket)
            })?;

        let stopping = Arc::new(Notify::new());
        let notify = stopping.clone();
        let relay = serve(settings, transport, socket, async move {
            if let Err(err) = shutdown().await {
                internal!(level = ERROR, "Unable to listen for shutdown signals: {err}");
            }
            notify.notify_one();
        });

        let result = tokio::select! {
            r = relay => r.map(|stats| {
                internal!(
                    level = INFO,
                    "Relay queue drained: {} sent, {} not sent",
                    stats.completed,
                    stats.canceled + stats.faulted + stats.skipped + stats.failed
                );
            }),
            () = async {
                stopping.notified().await;
                let _ = tokio::signal::ctrl_c().await;
            } => Err(anyhow::anyhow!("Forced shutdown before the relay queue was drained")),
        };

        internal!(level = INFO, "Relay stopped");

        result
    }
}

/// Run both workers until `shutdown` resolves or the inbound worker stops,
/// then wait for the outbound worker to drain the queue.
///
/// # Errors
/// If either worker stopped unexpectedly
pub async fn serve<F>(
    settings: Settings,
    transport: Arc<dyn MailTransport>,
    socket: TcpListener,
    shutdown: F,
) -> anyhow::Result<DeliveryStats>
where
    F: Future<Output = ()> + Send,
{
    let Settings { inbound, graph } = settings;
    let (signal, _) = broadcast::channel(64);
    let (writer, reader) = queue::channel();

    let outbound = OutboundWorker::from_settings(reader, transport, &graph);
    let inbound = InboundWorker::new(inbound, writer);

    let outbound = tokio::spawn(outbound.run(signal.subscribe()));
    let mut inbound = tokio::spawn(inbound.serve(socket, signal.subscribe()));

    let stopped_early = tokio::select! {
        r = &mut inbound => Some(r),
        () = shutdown => None,
    };

    internal!(level = INFO, "Shutting down...");
    let _ = signal.send(Signal::Shutdown);

    let inbound = match stopped_early {
        Some(r) => r,
        None => inbound.await,
    };
    let stats = outbound.await?;

    inbound??;

    Ok(stats)
}
