//! Producer side: [`RedpandaPublisher`].
//!
//! The workers never publish; this is used to republish dead letters and to
//! seed topics in tests.

use banking_ledger_core::message::QueueKind;
use banking_ledger_core::source::MessageSourceError;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Publishes raw request payloads to the topic of a [`QueueKind`].
pub struct RedpandaPublisher {
    producer: FutureProducer,
    topics: HashMap<QueueKind, String>,
    timeout: Duration,
}

impl RedpandaPublisher {
    /// Create a publisher using the default topic names
    /// (`account_creator`, `transaction_processor`).
    ///
    /// # Errors
    ///
    /// Returns [`MessageSourceError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, MessageSourceError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| {
                MessageSourceError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let topics = [QueueKind::AccountCreation, QueueKind::Transaction]
            .into_iter()
            .map(|queue| (queue, queue.as_str().to_string()))
            .collect();

        tracing::info!(brokers, "RedpandaPublisher created");

        Ok(Self {
            producer,
            topics,
            timeout: Duration::from_secs(5),
        })
    }

    /// Publish `queue`'s messages to `topic` instead of the default.
    #[must_use]
    pub fn with_topic(mut self, queue: QueueKind, topic: impl Into<String>) -> Self {
        self.topics.insert(queue, topic.into());
        self
    }

    /// Topic `queue`'s messages are published to.
    #[must_use]
    pub fn topic(&self, queue: QueueKind) -> &str {
        self.topics.get(&queue).map_or_else(|| queue.as_str(), String::as_str)
    }

    /// Publish a raw payload, keyed by `key` for partitioning.
    ///
    /// # Errors
    ///
    /// Returns [`MessageSourceError::TransportError`] if the broker does not accept it.
    pub async fn publish(
        &self,
        queue: QueueKind,
        key: &str,
        payload: &[u8],
    ) -> Result<(), MessageSourceError> {
        let topic = self.topic(queue);
        let record = FutureRecord::to(topic).payload(payload).key(key);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(topic, partition, offset, key, "Message published");
                Ok(())
            },
            Err((kafka_error, _)) => {
                tracing::error!(topic, error = %kafka_error, "Failed to publish message");
                Err(MessageSourceError::TransportError(kafka_error.to_string()))
            },
        }
    }

    /// Serialize `message` as JSON and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`MessageSourceError::TransportError`] if serialization or the
    /// broker fails.
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        queue: QueueKind,
        key: &str,
        message: &T,
    ) -> Result<(), MessageSourceError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| MessageSourceError::TransportError(format!("Failed to serialize message: {e}")))?;
        self.publish(queue, key, &payload).await
    }
}

impl std::fmt::Debug for RedpandaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaPublisher")
            .field("topics", &self.topics)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
