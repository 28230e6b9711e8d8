use std::{io, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::broadcast,
};

use crate::{
    Signal,
    address::Mailbox,
    error::SessionError,
    incoming, internal, outgoing,
    smtp::{
        FilterResult, MailboxFilter, MessageBuffer, MessageStore, Reply, SessionContext,
        SessionLimits, Status, Transaction,
        command::{Command, CommandError, HeloVariant},
        state::State,
    },
};

const MAX_COMMAND_LINE: u64 = 4096;
const MAX_DATA_LINE: u64 = 64 * 1024;

/// Everything a session needs that is shared across connections.
#[derive(Clone)]
pub struct SessionConfig {
    pub banner: Arc<str>,
    pub limits: SessionLimits,
    pub filter: Arc<dyn MailboxFilter>,
    pub store: Arc<dyn MessageStore>,
}

enum Flow {
    Continue,
    Close,
}

/// Read one line, up to `limit` bytes. `None` at end of stream.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: u64,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, SessionError> {
    let mut line = Vec::new();
    let read = tokio::time::timeout(timeout, (&mut *reader).take(limit).read_until(b'\n', &mut line))
        .await
        .map_err(|_| SessionError::Timeout)??;

    Ok((read > 0).then_some(line))
}

pub struct Session<Stream> {
    context: SessionContext,
    connection: BufReader<Stream>,
    state: State,
    transaction: Transaction,
    config: SessionConfig,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn new(stream: Stream, context: SessionContext, config: SessionConfig) -> Self {
        Self {
            context,
            connection: BufReader::new(stream),
            state: State::default(),
            transaction: Transaction::default(),
            config,
        }
    }

    /// Drive the dialogue until the client quits, disconnects, or the server
    /// shuts down.
    ///
    /// # Errors
    /// If the connection fails
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        let greeting = format!("{} ESMTP ready", self.config.banner);
        self.send(&Reply::new(Status::ServiceReady, greeting)).await?;

        let timeout = self.config.limits.command_timeout;

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => None,
                line = read_line(&mut self.connection, MAX_COMMAND_LINE, timeout) => Some(line),
            };

            let line = match received {
                None => {
                    let text = format!("{} Service shutting down", self.config.banner);
                    self.send(&Reply::new(Status::Unavailable, text)).await?;
                    return Ok(());
                }
                Some(Err(SessionError::Timeout)) => {
                    internal!(level = DEBUG, "Session {} timed out waiting for a command", self.context.id);
                    self.send(&Reply::new(Status::Unavailable, "Timeout waiting for command"))
                        .await?;
                    return Ok(());
                }
                Some(Err(err)) => return Err(err),
                Some(Ok(None)) => return Ok(()),
                Some(Ok(Some(line))) => line,
            };

            incoming!("{} {}", self.context.peer, String::from_utf8_lossy(&line).trim_end());

            if matches!(self.handle(Command::try_from(line.as_slice())).await?, Flow::Close) {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, command: Result<Command, CommandError>) -> Result<Flow, SessionError> {
        let command = match command {
            Ok(command) => command,
            Err(err @ CommandError::Unknown(_)) => {
                self.send(&Reply::new(Status::SyntaxError, err.to_string())).await?;
                return Ok(Flow::Continue);
            }
            Err(CommandError::Syntax(text)) => {
                self.send(&Reply::new(Status::InvalidParameters, text)).await?;
                return Ok(Flow::Continue);
            }
        };

        if !self.state.permits(&command) {
            self.send(&Reply::new(Status::InvalidCommandSequence, "Bad sequence of commands"))
                .await?;
            return Ok(Flow::Continue);
        }

        let (reply, advance) = match &command {
            Command::Helo(variant) => (self.greet(variant), true),
            Command::MailFrom { sender, size } => self.mail_from(sender.as_ref(), *size).await,
            Command::RcptTo(recipient) => {
                self.transaction.recipients.push(recipient.clone());
                (Reply::ok("Ok"), true)
            }
            Command::Data => (self.data().await?, true),
            Command::Rset => {
                self.transaction = Transaction::default();
                (Reply::ok("Ok"), true)
            }
            Command::Noop => (Reply::ok("Ok"), true),
            Command::Quit => {
                let text = format!("{} closing connection", self.config.banner);
                (Reply::new(Status::GoodBye, text), true)
            }
        };

        if advance {
            self.state = self.state.transition(&command);
        }

        self.send(&reply).await?;

        Ok(if self.state == State::Closed {
            Flow::Close
        } else {
            Flow::Continue
        })
    }

    fn greet(&mut self, variant: &HeloVariant) -> Reply {
        self.context.helo = Some(variant.name().to_string());
        self.transaction = Transaction::default();

        let reply = Reply::ok(format!("{} greets {}", self.config.banner, variant.name()));
        match variant {
            HeloVariant::Ehlo(_) => reply
                .with_line(format!("SIZE {}", self.config.limits.max_message_size))
                .with_line("8BITMIME"),
            HeloVariant::Helo(_) => reply,
        }
    }

    async fn mail_from(
        &mut self,
        sender: Option<&Mailbox>,
        size: Option<usize>,
    ) -> (Reply, bool) {
        let max = self.config.limits.max_message_size;
        if size.is_some_and(|size| size > max) {
            return (
                Reply::new(
                    Status::ExceededStorage,
                    format!("Declared message size exceeds maximum of {max} bytes"),
                ),
                false,
            );
        }

        match self.config.filter.can_accept_from(&self.context, sender, size).await {
            FilterResult::Accept => {
                self.transaction = Transaction {
                    sender: sender.cloned(),
                    recipients: Vec::new(),
                    declared_size: size,
                };
                (Reply::ok("Ok"), true)
            }
            FilterResult::RejectTemporarily => (
                Reply::temporary("Sender not accepted at this time, try again later"),
                false,
            ),
            FilterResult::RejectPermanently => (
                Reply::new(Status::MailboxNameNotAllowed, "Sender address rejected"),
                false,
            ),
        }
    }

    async fn data(&mut self) -> Result<Reply, SessionError> {
        self.send(&Reply::new(
            Status::StartMailInput,
            "End data with <CR><LF>.<CR><LF>",
        ))
        .await?;

        let transaction = std::mem::take(&mut self.transaction);

        match self.receive_data().await? {
            Some(buffer) => Ok(self.config.store.save(&self.context, &transaction, buffer).await),
            None => Ok(Reply::new(
                Status::ExceededStorage,
                format!(
                    "Message exceeds maximum size of {} bytes",
                    self.config.limits.max_message_size
                ),
            )),
        }
    }

    /// Read message content up to the terminating `.` line, undoing dot
    /// stuffing. `None` if the content was larger than permitted.
    async fn receive_data(&mut self) -> Result<Option<MessageBuffer>, SessionError> {
        let timeout = self.config.limits.data_timeout;
        let max = self.config.limits.max_message_size;

        let mut buffer = MessageBuffer::default();
        let mut oversized = false;
        let mut line_start = true;

        loop {
            let Some(segment) = read_line(&mut self.connection, MAX_DATA_LINE, timeout).await? else {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            };

            let at_start = line_start;
            line_start = segment.ends_with(b"\n");

            if at_start && (segment == b".\r\n" || segment == b".\n") {
                break;
            }

            let content = if at_start && segment.starts_with(b".") {
                &segment[1..]
            } else {
                &segment[..]
            };

            oversized = oversized || buffer.len() + content.len() > max;
            if !oversized {
                buffer.push(content);
            }
        }

        Ok((!oversized).then_some(buffer))
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        let rendered = reply.render();
        outgoing!("{} {}", self.context.peer, rendered.trim_end());

        let stream = self.connection.get_mut();
        stream.write_all(rendered.as_bytes()).await?;
        stream.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
        sync::broadcast,
    };

    use super::{Session, SessionConfig};
    use crate::{
        Signal,
        address::Mailbox,
        smtp::{
            FilterResult, MailboxFilter, MessageBuffer, MessageStore, Reply, SessionContext,
            SessionLimits, Transaction,
        },
    };

    struct StaticFilter(FilterResult);

    #[async_trait]
    impl MailboxFilter for StaticFilter {
        async fn can_accept_from(
            &self,
            _context: &SessionContext,
            sender: Option<&Mailbox>,
            _size: Option<usize>,
        ) -> FilterResult {
            if sender.is_none() {
                FilterResult::RejectPermanently
            } else {
                self.0
            }
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        messages: Mutex<Vec<(Transaction, Vec<u8>)>>,
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn save(
            &self,
            _context: &SessionContext,
            transaction: &Transaction,
            buffer: MessageBuffer,
        ) -> Reply {
            self.messages
                .lock()
                .expect("lock")
                .push((transaction.clone(), buffer.into_contiguous()));
            Reply::ok("Ok: queued")
        }
    }

    struct Client {
        stream: BufReader<DuplexStream>,
    }

    impl Client {
        async fn line(&mut self) -> String {
            let mut line = String::new();
            self.stream.read_line(&mut line).await.expect("read");
            line
        }

        async fn send(&mut self, data: &str) {
            self.stream.get_mut().write_all(data.as_bytes()).await.expect("write");
        }

        async fn command(&mut self, command: &str) -> String {
            self.send(&format!("{command}\r\n")).await;
            self.line().await
        }
    }

    fn start(
        filter: FilterResult,
        store: Arc<RecordingStore>,
        limits: SessionLimits,
    ) -> (Client, broadcast::Sender<Signal>, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = broadcast::channel(1);
        let peer: SocketAddr = "10.0.0.5:40000".parse().expect("socket");

        let session = Session::new(
            server,
            SessionContext::new(1, peer),
            SessionConfig {
                banner: Arc::from("relay.contoso.com"),
                limits,
                filter: Arc::new(StaticFilter(filter)),
                store,
            },
        );

        let handle = tokio::spawn(async move {
            session.run(rx).await.expect("session");
        });

        (
            Client {
                stream: BufReader::new(client),
            },
            tx,
            handle,
        )
    }

    #[tokio::test]
    async fn complete_transaction() {
        let store = Arc::new(RecordingStore::default());
        let (mut client, _tx, handle) =
            start(FilterResult::Accept, store.clone(), SessionLimits::default());

        assert_eq!(client.line().await, "220 relay.contoso.com ESMTP ready\r\n");
        assert_eq!(client.command("EHLO app01").await, "250-relay.contoso.com greets app01\r\n");
        assert!(client.line().await.starts_with("250-SIZE "));
        assert_eq!(client.line().await, "250 8BITMIME\r\n");
        assert_eq!(client.command("MAIL FROM:<app@contoso.com>").await, "250 Ok\r\n");
        assert_eq!(client.command("RCPT TO:<user@contoso.com>").await, "250 Ok\r\n");
        assert!(client.command("DATA").await.starts_with("354 "));

        client
            .send("From: app@contoso.com\r\nSubject: hi\r\n\r\n..leading dot\r\nbody\r\n.\r\n")
            .await;
        assert_eq!(client.line().await, "250 Ok: queued\r\n");
        assert_eq!(client.command("QUIT").await, "221 relay.contoso.com closing connection\r\n");

        handle.await.expect("session task");

        let messages = store.messages.lock().expect("lock");
        assert_eq!(messages.len(), 1);
        let (transaction, content) = &messages[0];
        assert_eq!(
            transaction.sender.as_ref().map(Mailbox::address),
            Some("app@contoso.com")
        );
        assert_eq!(transaction.recipients.len(), 1);
        assert_eq!(
            String::from_utf8_lossy(content),
            "From: app@contoso.com\r\nSubject: hi\r\n\r\n.leading dot\r\nbody\r\n"
        );
    }

    #[tokio::test]
    async fn sequence_errors() {
        let store = Arc::new(RecordingStore::default());
        let (mut client, _tx, _handle) =
            start(FilterResult::Accept, store, SessionLimits::default());

        client.line().await;
        assert!(client.command("MAIL FROM:<app@contoso.com>").await.starts_with("503 "));
        assert!(client.command("HELO app01").await.starts_with("250 "));
        assert!(client.command("DATA").await.starts_with("503 "));
        assert!(client.command("VRFY root").await.starts_with("500 "));
        assert!(client.command("RCPT TO:<user@contoso.com>").await.starts_with("503 "));
        assert!(client.command("RCPT TO:<>").await.starts_with("501 "));
        assert!(client.command("MAIL FROM:<bad").await.starts_with("501 "));
    }

    #[tokio::test]
    async fn filter_rejections() {
        let store = Arc::new(RecordingStore::default());
        let (mut client, _tx, _handle) =
            start(FilterResult::RejectTemporarily, store, SessionLimits::default());

        client.line().await;
        client.command("HELO app01").await;
        assert!(client.command("MAIL FROM:<app@contoso.com>").await.starts_with("451 "));
        assert!(client.command("MAIL FROM:<>").await.starts_with("553 "));
        assert!(client.command("RCPT TO:<user@contoso.com>").await.starts_with("503 "));
    }

    #[tokio::test]
    async fn oversized_messages_are_refused() {
        let store = Arc::new(RecordingStore::default());
        let limits = SessionLimits {
            max_message_size: 16,
            ..SessionLimits::default()
        };
        let (mut client, _tx, _handle) = start(FilterResult::Accept, store.clone(), limits);

        client.line().await;
        client.command("HELO app01").await;
        assert!(client.command("MAIL FROM:<app@contoso.com> SIZE=100").await.starts_with("552 "));
        client.command("MAIL FROM:<app@contoso.com>").await;
        client.command("RCPT TO:<user@contoso.com>").await;
        client.command("DATA").await;
        client.send("Subject: far too long for the limit\r\n\r\nbody\r\n.\r\n").await;
        assert!(client.line().await.starts_with("552 "));

        assert!(store.messages.lock().expect("lock").is_empty());
        assert!(client.command("NOOP").await.starts_with("250 "));
    }

    #[tokio::test]
    async fn shutdown_closes_idle_sessions() {
        let store = Arc::new(RecordingStore::default());
        let (mut client, tx, handle) =
            start(FilterResult::Accept, store, SessionLimits::default());

        client.line().await;
        tx.send(Signal::Shutdown).expect("send shutdown");

        assert!(client.line().await.starts_with("421 "));
        handle.await.expect("session task");
    }
}
