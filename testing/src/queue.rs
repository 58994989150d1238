//! In-memory message source.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use banking_ledger_core::BoxFuture;
use banking_ledger_core::message::QueueKind;
use banking_ledger_core::source::{Acknowledger, Delivery, MessageSource, MessageSourceError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Envelope = (u64, QueueKind, Vec<u8>);

/// In-memory [`MessageSource`] shared by any number of workers.
///
/// Messages are handed out in publish order, each to exactly one caller of
/// `receive`. After [`MessageSource::close`], already-published messages are
/// still delivered and `receive` then returns `None`.
#[derive(Debug)]
pub struct InMemoryQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    next_id: AtomicU64,
    acked: Arc<Mutex<Vec<u64>>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// Create an open, empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            next_id: AtomicU64::new(1),
            acked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publish a raw payload, returning its delivery id.
    ///
    /// Returns `None` if the queue has been closed.
    pub fn publish(&self, queue: QueueKind, payload: impl Into<Vec<u8>>) -> Option<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()?
            .send((id, queue, payload.into()))
            .ok()
            .map(|()| id)
    }

    /// Publish `message` as JSON, returning its delivery id.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `message` cannot be encoded.
    pub fn publish_json<T: Serialize>(
        &self,
        queue: QueueKind,
        message: &T,
    ) -> Result<Option<u64>, serde_json::Error> {
        let payload = serde_json::to_vec(message)?;
        Ok(self.publish(queue, payload))
    }

    /// Ids of acknowledged deliveries, in acknowledgement order.
    #[must_use]
    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    /// Number of acknowledged deliveries.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }
}

impl MessageSource for InMemoryQueue {
    fn receive(&self) -> BoxFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let (id, queue, payload) = self.receiver.lock().await.recv().await?;
            let acker = RecordingAcker {
                id,
                acked: Arc::clone(&self.acked),
            };
            Some(Delivery::new(queue, payload, Box::new(acker)))
        })
    }

    fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}

struct RecordingAcker {
    id: u64,
    acked: Arc<Mutex<Vec<u64>>>,
}

impl Acknowledger for RecordingAcker {
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), MessageSourceError>> {
        Box::pin(async move {
            self.acked.lock().unwrap().push(self.id);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_and_records_acks() {
        let queue = InMemoryQueue::new();
        let first = queue.publish(QueueKind::Transaction, b"one".to_vec());
        let second = queue.publish(QueueKind::AccountCreation, b"two".to_vec());

        let delivery = queue.receive().await.expect("first");
        assert_eq!(delivery.payload(), b"one");
        delivery.ack().await.expect("ack");

        let delivery = queue.receive().await.expect("second");
        assert_eq!(delivery.queue(), QueueKind::AccountCreation);
        delivery.ack().await.expect("ack");

        assert_eq!(queue.acked(), vec![first.expect("id"), second.expect("id")]);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = InMemoryQueue::new();
        queue.publish(QueueKind::Transaction, b"pending".to_vec());
        queue.close();

        assert!(queue.publish(QueueKind::Transaction, b"late".to_vec()).is_none());
        assert!(queue.receive().await.is_some());
        assert!(queue.receive().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_receivers() {
        let queue = Arc::new(InMemoryQueue::new());
        let waiting = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await.is_none() })
        };

        tokio::task::yield_now().await;
        queue.close();
        assert!(waiting.await.expect("join"));
    }
}
