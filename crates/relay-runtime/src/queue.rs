//! Control queue between timer producers and the scheduler thread.
//!
//! Any number of producers may [`put`](ControlQueue::put) concurrently; a
//! single consumer drains messages one at a time or in batches. An unbounded
//! queue never refuses a message. A bounded queue stores messages in a ring
//! allocated up front, so producers never allocate and a full queue is
//! reported to the caller instead.

use crate::message::TickMessage;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Reasons a message could not be enqueued or dequeued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The bounded queue has no free slot.
    #[error("control queue full")]
    Full,
    /// The other side of the queue is gone.
    #[error("control queue closed")]
    Closed,
}

/// Multi-producer, single-consumer mailbox of [`TickMessage`]s.
#[derive(Debug)]
pub struct ControlQueue {
    name: String,
    tx: Sender<TickMessage>,
    rx: Receiver<TickMessage>,
}

impl ControlQueue {
    /// Create a queue with no capacity limit.
    #[must_use]
    pub fn unbounded(name: impl Into<String>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let name = name.into();
        debug!(queue = %name, "Control queue created");
        Self { name, tx, rx }
    }

    /// Create a queue holding at most `capacity` messages.
    #[must_use]
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let name = name.into();
        debug!(queue = %name, capacity, "Control queue created");
        Self { name, tx, rx }
    }

    /// Queue name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no message is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Enqueue a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when a bounded queue has no room.
    pub fn put(&self, message: TickMessage) -> Result<(), QueueError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Disconnected(_) => QueueError::Closed,
        })
    }

    /// Enqueue a message, waiting up to `timeout` for room in a bounded queue.
    ///
    /// Only for callers that may block, such as the owner delivering the
    /// terminate request.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] if no slot freed up in time and
    /// [`QueueError::Closed`] if the queue can no longer deliver.
    pub fn put_timeout(&self, message: TickMessage, timeout: Duration) -> Result<(), QueueError> {
        self.tx.send_timeout(message, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => QueueError::Full,
            SendTimeoutError::Disconnected(_) => QueueError::Closed,
        })
    }

    /// Fetch one message.
    ///
    /// With `blocking` set this waits until a message is available; otherwise
    /// it returns `Ok(None)` on an empty queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue can no longer deliver.
    pub fn pop_one(&self, blocking: bool) -> Result<Option<TickMessage>, QueueError> {
        if blocking {
            return self.rx.recv().map(Some).map_err(|_| QueueError::Closed);
        }
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Fetch up to `max` messages into `out`, returning how many were added.
    ///
    /// With `blocking` set this waits for the first message, then takes
    /// whatever else is already queued without waiting further.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue can no longer deliver.
    pub fn pop_batch(
        &self,
        out: &mut Vec<TickMessage>,
        max: usize,
        blocking: bool,
    ) -> Result<usize, QueueError> {
        if max == 0 {
            return Ok(0);
        }

        let mut count = 0;
        if blocking {
            out.push(self.rx.recv().map_err(|_| QueueError::Closed)?);
            count += 1;
        }

        while count < max {
            match self.rx.try_recv() {
                Ok(message) => {
                    out.push(message);
                    count += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if count == 0 {
                        return Err(QueueError::Closed);
                    }
                    break;
                }
            }
        }

        Ok(count)
    }
}
