//! The in-memory relay queue between intake and delivery.
//!
//! Any number of [`QueueWriter`]s feed a single [`QueueReader`] in FIFO order.
//! Capacity is unbounded so an enqueue never waits. Closing the queue, either
//! explicitly or by dropping every writer, stops new entries from arriving but
//! everything already buffered is still handed to the reader.

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::{error::QueueError, message::QueueEntry};

/// Create a connected writer and reader.
pub fn channel() -> (QueueWriter, QueueReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueWriter { tx }, QueueReader { rx, closed: false })
}

#[derive(Debug, Clone)]
pub struct QueueWriter {
    tx: mpsc::UnboundedSender<QueueEntry>,
}

impl QueueWriter {
    /// Append an entry to the back of the queue.
    ///
    /// # Errors
    /// If the queue has been closed by its reader
    pub fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.tx.send(entry).map_err(|_| QueueError::Closed)
    }
}

#[derive(Debug)]
pub struct QueueReader {
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    closed: bool,
}

impl QueueReader {
    /// Wait for the next entry.
    ///
    /// Returns `None` only once the queue is closed and fully drained.
    pub async fn dequeue_or_wait(&mut self) -> Option<QueueEntry> {
        let entry = self.rx.recv().await;
        if entry.is_none() {
            self.closed = true;
        }
        entry
    }

    /// Take the next entry if one is already buffered.
    pub fn try_dequeue(&mut self) -> Option<QueueEntry> {
        match self.rx.try_recv() {
            Ok(entry) => Some(entry),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Refuse any further writes. Buffered entries remain readable.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Whether the end of the stream has been observed.
    pub const fn is_finished(&self) -> bool {
        self.closed
    }
}
