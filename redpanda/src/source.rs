//! Consumer side: [`RedpandaMessageSource`].

use banking_ledger_core::BoxFuture;
use banking_ledger_core::message::QueueKind;
use banking_ledger_core::source::{Acknowledger, Delivery, MessageSource, MessageSourceError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Pause after a broker error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Offsets handed out and acknowledged on one partition.
#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    acked: BTreeSet<i64>,
    committed: Option<i64>,
}

/// Per-partition low watermark of acknowledged records.
///
/// Kafka commits are cumulative: committing `n` marks every earlier offset
/// consumed. Workers finish out of order, so a partition is only committed
/// up to its lowest record still in flight.
#[derive(Debug, Default)]
struct OffsetTracker {
    partitions: Mutex<HashMap<(String, i32), PartitionOffsets>>,
}

impl OffsetTracker {
    /// Record that `offset` was handed to a worker.
    fn track(&self, topic: &str, partition: i32, offset: i64) {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .in_flight
            .insert(offset);
    }

    /// Mark `offset` acknowledged. Returns the offset to commit when the
    /// watermark moved, `None` while an earlier record is still in flight.
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        let state = partitions.entry((topic.to_string(), partition)).or_default();

        state.in_flight.remove(&offset);
        state.acked.insert(offset);

        let next = match state.in_flight.first() {
            Some(&lowest) => lowest,
            None => state.acked.last().map_or(offset, |&last| last) + 1,
        };
        state.acked.retain(|&acked| acked >= next);

        // The watermark only moves when the lowest in-flight record is acked.
        if next <= offset || state.committed.is_some_and(|committed| committed >= next) {
            return None;
        }
        state.committed = Some(next);
        Some(next)
    }
}

/// Kafka-compatible [`MessageSource`] over a consumer group.
///
/// One instance is shared by every worker. Closing it makes all pending and
/// future [`receive`](MessageSource::receive) calls return `None`; records
/// not yet handed out stay uncommitted and go to the next group member.
pub struct RedpandaMessageSource {
    consumer: Arc<StreamConsumer>,
    topics: HashMap<String, QueueKind>,
    offsets: Arc<OffsetTracker>,
    closed: watch::Sender<bool>,
}

impl RedpandaMessageSource {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaMessageSourceBuilder {
        RedpandaMessageSourceBuilder::default()
    }

    /// Track `message` as in flight and build the acknowledger that releases it.
    fn offset_commit(&self, message: &BorrowedMessage<'_>) -> OffsetCommit {
        self.offsets.track(message.topic(), message.partition(), message.offset());
        OffsetCommit {
            consumer: Arc::clone(&self.consumer),
            offsets: Arc::clone(&self.offsets),
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        }
    }

    fn delivery(&self, message: &BorrowedMessage<'_>, queue: QueueKind) -> Delivery {
        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        Delivery::new(queue, payload, Box::new(self.offset_commit(message)))
    }

    /// Commit a record nobody will process (unmapped topic).
    fn skip(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.offset_commit(message).commit() {
            tracing::warn!(topic = message.topic(), error = %e, "Failed to commit skipped record");
        }
    }
}

impl MessageSource for RedpandaMessageSource {
    fn receive(&self) -> BoxFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            loop {
                if *closed.borrow_and_update() {
                    return None;
                }

                let message = tokio::select! {
                    _ = closed.changed() => return None,
                    message = self.consumer.recv() => message,
                };

                match message {
                    Ok(message) => {
                        if let Some(queue) = self.topics.get(message.topic()).copied() {
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received record"
                            );
                            return Some(self.delivery(&message, queue));
                        }
                        tracing::warn!(
                            topic = message.topic(),
                            offset = message.offset(),
                            "Record from unmapped topic, skipping"
                        );
                        self.skip(&message);
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to receive record");
                        metrics::counter!("ledger.broker.errors").increment(1);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    },
                }
            }
        })
    }

    fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!("Message source closed");
        }
    }
}

impl std::fmt::Debug for RedpandaMessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaMessageSource")
            .field("topics", &self.topics)
            .field("closed", &*self.closed.borrow())
            .finish_non_exhaustive()
    }
}

/// Acknowledges a record by committing the offset after it.
struct OffsetCommit {
    consumer: Arc<StreamConsumer>,
    offsets: Arc<OffsetTracker>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl OffsetCommit {
    fn commit(&self) -> Result<(), MessageSourceError> {
        let Some(next) = self.offsets.ack(&self.topic, self.partition, self.offset) else {
            return Ok(());
        };

        let mut partitions = TopicPartitionList::new();
        partitions
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(next))
            .map_err(|e| MessageSourceError::AckFailed(e.to_string()))?;

        self.consumer
            .commit(&partitions, CommitMode::Async)
            .map_err(|e| MessageSourceError::AckFailed(e.to_string()))
    }
}

impl Acknowledger for OffsetCommit {
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), MessageSourceError>> {
        Box::pin(async move {
            self.commit().inspect_err(|e| {
                tracing::warn!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = self.offset,
                    error = %e,
                    "Failed to commit offset (record may be redelivered)"
                );
            })
        })
    }
}

/// Builder for [`RedpandaMessageSource`].
///
/// # Example
///
/// ```no_run
/// use banking_ledger_core::message::QueueKind;
/// use banking_ledger_redpanda::RedpandaMessageSource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = RedpandaMessageSource::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .group_id("banking-ledger-workers")
///     .topic("transaction_processor", QueueKind::Transaction)
///     .auto_offset_reset("latest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RedpandaMessageSourceBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    topics: HashMap<String, QueueKind>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMessageSourceBuilder {
    /// Comma-separated broker addresses (e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Consumer group shared by every worker process.
    ///
    /// Default: `banking-ledger-workers`
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Subscribe to `topic`, tagging its records as `queue`.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>, queue: QueueKind) -> Self {
        self.topics.insert(topic.into(), queue);
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so requests published before the first worker
    /// started are not lost.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the source and subscribe to the configured topics.
    ///
    /// # Errors
    ///
    /// Returns [`MessageSourceError::ConnectionFailed`] if:
    /// - Brokers are not set
    /// - No topic is configured
    /// - The consumer cannot be created or subscribed
    pub fn build(self) -> Result<RedpandaMessageSource, MessageSourceError> {
        let brokers = self
            .brokers
            .ok_or_else(|| MessageSourceError::ConnectionFailed("Brokers not configured".to_string()))?;
        if self.topics.is_empty() {
            return Err(MessageSourceError::ConnectionFailed(
                "No topics configured".to_string(),
            ));
        }

        let group_id = self
            .group_id
            .unwrap_or_else(|| "banking-ledger-workers".to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| MessageSourceError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        let mut topic_names: Vec<&str> = self.topics.keys().map(String::as_str).collect();
        topic_names.sort_unstable();
        consumer.subscribe(&topic_names).map_err(|e| {
            MessageSourceError::ConnectionFailed(format!("Failed to subscribe to topics: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            group_id = %group_id,
            topics = ?topic_names,
            auto_offset_reset = %auto_offset_reset,
            "Subscribed to request topics"
        );

        let (closed, _) = watch::channel(false);
        Ok(RedpandaMessageSource {
            consumer: Arc::new(consumer),
            topics: self.topics,
            offsets: Arc::new(OffsetTracker::default()),
            closed,
        })
    }
}
