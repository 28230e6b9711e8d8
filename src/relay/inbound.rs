use std::sync::Arc;

use tokio::{net::TcpListener, sync::broadcast};

use crate::{
    Signal,
    config::InboundSettings,
    events::RelayEvent,
    internal,
    queue::QueueWriter,
    relay::{RelayFilter, RelayStore},
    smtp::Listener,
};

/// Owns the SMTP listener for the lifetime of the relay.
///
/// When the worker stops, its queue writer is dropped, which lets the
/// delivery side know no further entries will arrive.
pub struct InboundWorker {
    settings: InboundSettings,
    writer: QueueWriter,
}

impl InboundWorker {
    pub fn new(settings: InboundSettings, writer: QueueWriter) -> Self {
        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerInitializing.id(),
            "Initializing SMTP worker"
        );

        Self { settings, writer }
    }

    /// # Errors
    /// If the configured socket cannot be bound
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.settings.socket).await
    }

    /// Bind the configured socket and serve until shutdown.
    ///
    /// # Errors
    /// If the socket cannot be bound
    pub async fn run(self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let socket = self.bind().await.map_err(|err| {
            anyhow::anyhow!("Unable to listen on {}: {err}", self.settings.socket)
        })?;

        self.serve(socket, shutdown).await
    }

    /// Serve on an already bound socket until shutdown.
    ///
    /// # Errors
    /// If the listener fails
    pub async fn serve(
        self,
        socket: TcpListener,
        shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let Self { settings, writer } = self;

        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerStarting.id(),
            "Starting SMTP worker"
        );

        let listener = Listener::new(
            &settings.server_name,
            settings.limits,
            Arc::new(RelayFilter::new(Some(settings.allowed_senders.clone()))),
            Arc::new(RelayStore::new(writer, settings.intake_timeout)),
        );

        let local = socket.local_addr().unwrap_or(settings.socket);
        internal!(
            level = INFO,
            event_id = RelayEvent::SmtpWorkerStarted.id(),
            "SMTP worker listening on {local} as {}; incoming mail accepted from: {}",
            settings.server_name,
            settings.allowed_senders
        );

        let result = listener.serve(socket, shutdown).await;

        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerStopping.id(),
            "Stopping SMTP worker"
        );
        drop(listener);

        match &result {
            Ok(()) => internal!(
                level = INFO,
                event_id = RelayEvent::SmtpWorkerStopped.id(),
                "SMTP worker stopped"
            ),
            Err(err) => internal!(
                level = ERROR,
                event_id = RelayEvent::SmtpWorkerUnknownError.id(),
                "SMTP worker stopped unexpectedly: {err}"
            ),
        }

        result
    }
}
