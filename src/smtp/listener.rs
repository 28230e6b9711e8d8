use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures_util::future::join_all;
use tokio::{
    net::TcpListener,
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{
    Signal,
    events::RelayEvent,
    internal,
    smtp::{
        MailboxFilter, MessageStore, SessionContext, SessionLimits,
        session::{Session, SessionConfig},
    },
};

/// Accepts connections and runs a [`Session`] for each.
pub struct Listener {
    config: SessionConfig,
    next_session: AtomicU64,
}

impl Listener {
    pub fn new(
        banner: &str,
        limits: SessionLimits,
        filter: Arc<dyn MailboxFilter>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            config: SessionConfig {
                banner: Arc::from(banner),
                limits,
                filter,
                store,
            },
            next_session: AtomicU64::new(1),
        }
    }

    /// Serve connections until a shutdown signal arrives, then wait for every
    /// open session to finish.
    ///
    /// # Errors
    /// If the local address of the socket cannot be determined
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let address = listener.local_addr()?;
        let mut sessions: Vec<JoinHandle<()>> = Vec::default();

        internal!(level = DEBUG, "SMTP listener serving on {address}");

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(RecvError::Closed)) {
                        internal!(
                            level = INFO,
                            event_id = RelayEvent::SmtpWorkerCancelling.id(),
                            "SMTP listener {address} received shutdown signal, finishing sessions ..."
                        );
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => match connection {
                    Ok((stream, peer)) => {
                        sessions.retain(|session| !session.is_finished());

                        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Connection {id} received on {address} from {peer}");

                        let session = Session::new(stream, SessionContext::new(id, peer), self.config.clone());
                        let signal = shutdown.resubscribe();

                        sessions.push(tokio::spawn(async move {
                            if let Err(err) = session.run(signal).await {
                                internal!(level = WARN, "Session {id} with {peer} ended: {err}");
                            }
                        }));
                    }
                    Err(err) => {
                        internal!(level = ERROR, "Failed to accept connection on {address}: {err}");
                    }
                }
            }
        }

        Ok(())
    }
}
