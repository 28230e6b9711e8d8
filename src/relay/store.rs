use std::time::Duration;

use async_trait::async_trait;

use crate::{
    events::RelayEvent,
    internal,
    message::{MessageId, ParsedMessage, QueueEntry},
    queue::QueueWriter,
    smtp::{MessageBuffer, MessageStore, Reply, SessionContext, Transaction},
};

/// Turns received content into queue entries.
///
/// The client only sees success once the message is on the queue. Parsing
/// happens off the session task and must finish within the intake budget.
#[derive(Debug, Clone)]
pub struct RelayStore {
    writer: QueueWriter,
    intake_timeout: Duration,
}

impl RelayStore {
    pub const fn new(writer: QueueWriter, intake_timeout: Duration) -> Self {
        Self {
            writer,
            intake_timeout,
        }
    }
}

#[async_trait]
impl MessageStore for RelayStore {
    async fn save(
        &self,
        context: &SessionContext,
        transaction: &Transaction,
        buffer: MessageBuffer,
    ) -> Reply {
        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerMessageSaving.id(),
            session = context.id,
            "Saving {} byte message from {} for {} recipient(s)",
            buffer.len(),
            context.peer,
            transaction.recipients.len()
        );

        let parse =
            tokio::task::spawn_blocking(move || ParsedMessage::parse(&buffer.into_contiguous()));

        let message = match tokio::time::timeout(self.intake_timeout, parse).await {
            Ok(Ok(Ok(message))) => message,
            Ok(Ok(Err(err))) => {
                internal!(
                    level = WARN,
                    event_id = RelayEvent::SmtpWorkerMessageRejected.id(),
                    session = context.id,
                    "Rejected message from {}: {err}",
                    context.peer
                );
                return Reply::permanent(format!("Message could not be parsed: {err}"));
            }
            Ok(Err(err)) => {
                internal!(
                    level = ERROR,
                    event_id = RelayEvent::SmtpWorkerUnknownError.id(),
                    session = context.id,
                    "Message parsing failed unexpectedly: {err}"
                );
                return Reply::temporary("Local error in processing, try again later");
            }
            Err(_) => {
                internal!(
                    level = WARN,
                    event_id = RelayEvent::SmtpWorkerUnknownError.id(),
                    session = context.id,
                    "Message parsing exceeded {:?}",
                    self.intake_timeout
                );
                return Reply::temporary("Timed out processing message, try again later");
            }
        };

        let id = MessageId::generate();
        let (from, to) = (message.originator(), message.recipients());

        for ignored in message.ignored_addresses() {
            internal!(
                level = WARN,
                event_id = RelayEvent::SmtpWorkerMessageQueuing.id(),
                message_id = %id,
                "Ignoring unreadable {} address: {}",
                ignored.header,
                ignored.reason
            );
        }

        internal!(
            level = DEBUG,
            event_id = RelayEvent::SmtpWorkerMessageQueuing.id(),
            message_id = %id,
            "Queuing message from {from} to {to}"
        );

        match self.writer.enqueue(QueueEntry::new(id, message)) {
            Ok(()) => {
                internal!(
                    level = INFO,
                    event_id = RelayEvent::SmtpWorkerMessageQueued.id(),
                    message_id = %id,
                    "Queued message from {from} to {to}"
                );
                Reply::ok(format!("Ok: queued as {id}"))
            }
            Err(err) => {
                internal!(
                    level = ERROR,
                    event_id = RelayEvent::SmtpWorkerUnknownError.id(),
                    message_id = %id,
                    "Unable to queue message from {from}: {err}"
                );
                Reply::temporary("Relay queue unavailable, try again later")
            }
        }
    }
}
