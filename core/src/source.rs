//! Message sources and dead-letter sinks.
//!
//! A [`MessageSource`] is the single logical queue shared by every worker.
//! Each [`Delivery`] must be acknowledged exactly once; [`Delivery::ack`]
//! consumes the delivery so a second acknowledgement cannot be expressed.
//!
//! # Delivery semantics
//!
//! Messages are acknowledged after processing, whatever its outcome. There is
//! no negative acknowledgement: messages that could not be handled are handed
//! to a [`DeadLetterSink`] before being acknowledged.

use crate::BoxFuture;
use crate::message::QueueKind;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by a message source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageSourceError {
    /// Failed to connect or subscribe
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to receive a message
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Failed to acknowledge a message (it may be redelivered)
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),
}

/// Acknowledges one delivery with the broker.
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery as handled.
    ///
    /// # Errors
    ///
    /// Returns [`MessageSourceError::AckFailed`] if the broker rejected it.
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), MessageSourceError>>;
}

/// One message received from a [`MessageSource`].
pub struct Delivery {
    queue: QueueKind,
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery.
    #[must_use]
    pub fn new(queue: QueueKind, payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            queue,
            payload,
            acker,
        }
    }

    /// Queue the message arrived on.
    #[must_use]
    pub const fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Raw message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`MessageSourceError::AckFailed`] if the broker rejected it.
    pub async fn ack(self) -> Result<(), MessageSourceError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// The queue workers consume from.
///
/// # Implementations
///
/// - `RedpandaMessageSource` (in `banking-ledger-redpanda`): production
/// - `InMemoryQueue` (in `banking-ledger-testing`): tests
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    ///
    /// Returns `None` once the source has been closed and drained. Transport
    /// errors are handled (logged) by the source and do not end the stream.
    fn receive(&self) -> BoxFuture<'_, Option<Delivery>>;

    /// Stop handing out new messages; pending `receive` calls return `None`.
    fn close(&self);
}

/// A message that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Queue the message arrived on
    pub queue: QueueKind,
    /// Raw message body
    pub payload: Vec<u8>,
    /// Why processing failed
    pub error_message: String,
    /// Whether a later retry may succeed
    pub retryable: bool,
    /// When processing failed
    pub failed_at: DateTime<Utc>,
}

/// Errors raised by a dead-letter sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterError {
    /// Storage failure
    #[error("Dead letter storage error: {0}")]
    Storage(String),
}

/// Durable storage for messages that could not be processed.
pub trait DeadLetterSink: Send + Sync {
    /// Store a dead letter, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the letter could not be stored.
    fn add<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, Result<i64, DeadLetterError>>;
}
