//! The outbound half of the relay.
//!
//! A single [`OutboundWorker`] drains the relay queue in order, rewrites each
//! message's sender if configured to, and submits it through a
//! [`MailTransport`]. Every message gets exactly one attempt; failures are
//! logged and the message is dropped.

pub mod graph;
pub mod rewrite;
pub mod transport;

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError};

pub use graph::{GraphEndpoints, GraphTransport};
pub use rewrite::{AddressRewritePolicy, RewriteOutcome};
pub use transport::{MailTransport, SendMailRequest};

use crate::{
    Signal,
    config::GraphSettings,
    error::DeliveryError,
    events::RelayEvent,
    internal,
    message::{MessageId, ParsedMessage, QueueEntry},
    queue::QueueReader,
};

/// How a single submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    /// Abandoned before the transport answered, e.g. on timeout
    Canceled,
    Faulted(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub completed: usize,
    pub canceled: usize,
    pub faulted: usize,
    /// Messages never submitted, e.g. because the override address was unusable
    pub skipped: usize,
    /// Messages lost to an unexpected failure
    pub failed: usize,
}

impl DeliveryStats {
    /// Number of submissions made to the transport.
    pub const fn attempted(&self) -> usize {
        self.completed + self.canceled + self.faulted
    }

    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Completed => self.completed += 1,
            DeliveryOutcome::Canceled => self.canceled += 1,
            DeliveryOutcome::Faulted(_) => self.faulted += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    /// Shutdown requested; finishing whatever is still queued
    Draining,
    Stopped,
}

enum Wake {
    Entry(Option<QueueEntry>),
    Signal(Result<Signal, RecvError>),
}

pub struct OutboundWorker {
    reader: QueueReader,
    transport: Arc<dyn MailTransport>,
    mailbox: String,
    rewrite: AddressRewritePolicy,
    request_timeout: Duration,
    state: WorkerState,
    stats: DeliveryStats,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl OutboundWorker {
    pub fn new(reader: QueueReader, transport: Arc<dyn MailTransport>, mailbox: &str) -> Self {
        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerInitializing.id(),
            "Initializing Graph worker for {mailbox}"
        );

        Self {
            reader,
            transport,
            mailbox: mailbox.to_string(),
            rewrite: AddressRewritePolicy::default(),
            request_timeout: Duration::from_secs(100),
            state: WorkerState::Idle,
            stats: DeliveryStats::default(),
        }
    }

    pub fn from_settings(
        reader: QueueReader,
        transport: Arc<dyn MailTransport>,
        settings: &GraphSettings,
    ) -> Self {
        Self::new(reader, transport, &settings.mail_user)
            .with_rewrite_policy(AddressRewritePolicy::new(settings.from_override.clone()))
            .with_request_timeout(settings.request_timeout)
    }

    #[must_use]
    pub fn with_rewrite_policy(mut self, rewrite: AddressRewritePolicy) -> Self {
        self.rewrite = rewrite;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Deliver queued messages until shutdown has been requested and the queue
    /// is closed and empty.
    ///
    /// The queue closes once every writer is gone, so after a shutdown signal
    /// this keeps going until intake has stopped and everything it queued has
    /// been attempted.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) -> DeliveryStats {
        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerStarting.id(),
            "Starting Graph worker"
        );

        internal!(
            level = INFO,
            event_id = RelayEvent::GraphWorkerStarted.id(),
            "Graph worker started, sending as {}",
            self.mailbox
        );

        loop {
            let wake = tokio::select! {
                entry = self.reader.dequeue_or_wait() => Wake::Entry(entry),
                sig = shutdown.recv(), if self.state == WorkerState::Idle => Wake::Signal(sig),
            };

            match wake {
                Wake::Signal(Ok(Signal::Shutdown) | Err(RecvError::Closed)) => {
                    self.state = WorkerState::Draining;
                    internal!(
                        level = INFO,
                        event_id = RelayEvent::GraphWorkerCancelling.id(),
                        "Graph worker received shutdown signal, draining queue ..."
                    );
                }
                Wake::Signal(Err(RecvError::Lagged(_))) => {}
                Wake::Entry(Some(entry)) => {
                    self.process(entry).await;

                    while let Some(entry) = self.reader.try_dequeue() {
                        self.process(entry).await;
                    }
                }
                Wake::Entry(None) => break,
            }
        }

        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerStopping.id(),
            "Relay queue closed and drained"
        );

        self.state = WorkerState::Stopped;

        internal!(
            level = INFO,
            event_id = RelayEvent::GraphWorkerStopped.id(),
            "Graph worker stopped ({} completed, {} canceled, {} faulted, {} skipped, {} failed)",
            self.stats.completed,
            self.stats.canceled,
            self.stats.faulted,
            self.stats.skipped,
            self.stats.failed
        );

        self.stats
    }

    /// Handle one entry. Nothing that goes wrong here escapes.
    async fn process(&mut self, entry: QueueEntry) {
        let QueueEntry { id, message } = entry;

        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerMessageDequeued.id(),
            message_id = %id,
            "Dequeued message from {} to {}",
            message.originator(),
            message.recipients()
        );

        let result = AssertUnwindSafe(self.deliver(id, message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DeliveryError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(outcome) => self.stats.record(&outcome),
            Err(err @ DeliveryError::Rewrite(_)) => {
                self.stats.skipped += 1;
                internal!(
                    level = WARN,
                    event_id = RelayEvent::GraphWorkerUnknownError.id(),
                    message_id = %id,
                    "Message not sent: {err}"
                );
            }
            Err(err) => {
                self.stats.failed += 1;
                internal!(
                    level = ERROR,
                    event_id = RelayEvent::GraphWorkerUnknownError.id(),
                    message_id = %id,
                    "Unexpected failure sending message: {err}"
                );
            }
        }
    }

    async fn deliver(
        &self,
        id: MessageId,
        mut message: ParsedMessage,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerRequestBuildStarted.id(),
            message_id = %id,
            "Building request"
        );

        match self.rewrite.apply(&mut message)? {
            RewriteOutcome::Unchanged => {}
            RewriteOutcome::SenderRewritten { previous } => internal!(
                level = INFO,
                message_id = %id,
                "Rewrote Sender {} to {}",
                previous.address(),
                message.originator()
            ),
            RewriteOutcome::FromRewritten { previous } => internal!(
                level = INFO,
                message_id = %id,
                "Rewrote From {} to {}",
                previous.address(),
                message.originator()
            ),
            RewriteOutcome::Ambiguous { from_count } => internal!(
                level = WARN,
                message_id = %id,
                "Message has no Sender and {from_count} From addresses; sending without rewriting"
            ),
        }

        let (from, to) = (message.originator(), message.recipients());
        let request = SendMailRequest::from_message(&self.mailbox, &message);
        drop(message);

        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerRequestBuildFinished.id(),
            message_id = %id,
            "Built {} byte request",
            request.payload.len()
        );
        internal!(
            level = DEBUG,
            event_id = RelayEvent::GraphWorkerRequestSending.id(),
            message_id = %id,
            "Sending message from {from} to {to}"
        );

        let outcome = match tokio::time::timeout(self.request_timeout, self.transport.send_mail(request)).await {
            Err(_) => DeliveryOutcome::Canceled,
            Ok(Ok(())) => DeliveryOutcome::Completed,
            Ok(Err(err)) if err.is_canceled() => DeliveryOutcome::Canceled,
            Ok(Err(err)) => DeliveryOutcome::Faulted(err.to_string()),
        };

        match &outcome {
            DeliveryOutcome::Completed => internal!(
                level = INFO,
                event_id = RelayEvent::GraphWorkerRequestComplete.id(),
                message_id = %id,
                "Sent message from {from} to {to}"
            ),
            DeliveryOutcome::Canceled => internal!(
                level = WARN,
                event_id = RelayEvent::GraphWorkerRequestCanceled.id(),
                message_id = %id,
                "Sending message from {from} to {to} was canceled"
            ),
            DeliveryOutcome::Faulted(reason) => internal!(
                level = ERROR,
                event_id = RelayEvent::GraphWorkerRequestFaulted.id(),
                message_id = %id,
                "Sending message from {from} to {to} failed: {reason}"
            ),
        }

        Ok(outcome)
    }
}
