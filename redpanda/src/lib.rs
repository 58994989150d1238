//! Redpanda message source for the banking ledger workers.
//!
//! Account-creation requests and transaction intents arrive on two topics of
//! a Kafka-compatible broker. [`RedpandaMessageSource`] subscribes one consumer
//! group to both and hands each record to the worker pool as a
//! [`Delivery`](banking_ledger_core::source::Delivery), tagged with the
//! [`QueueKind`](banking_ledger_core::message::QueueKind) its topic maps to.
//!
//! # Delivery semantics
//!
//! **At-least-once** with manual offset commits:
//! - Auto-commit is disabled; acknowledging a delivery commits its offset
//! - A record whose processing was interrupted by a crash is redelivered
//! - Message handlers must tolerate duplicates (the transaction id is the
//!   correlation key)
//! - A partition is committed only up to its lowest record still being
//!   processed, so a record acknowledged early never hides an earlier one
//!   that a crash interrupted
//!
//! Ordering is guaranteed per partition, but workers process concurrently,
//! so two records for the same account may be applied in either order. The
//! ledger's row locks keep every individual mutation consistent.
//!
//! # Example
//!
//! ```no_run
//! use banking_ledger_core::message::QueueKind;
//! use banking_ledger_core::source::MessageSource;
//! use banking_ledger_redpanda::RedpandaMessageSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = RedpandaMessageSource::builder()
//!     .brokers("localhost:9092")
//!     .group_id("banking-ledger-workers")
//!     .topic("account_creator", QueueKind::AccountCreation)
//!     .topic("transaction_processor", QueueKind::Transaction)
//!     .build()?;
//!
//! while let Some(delivery) = source.receive().await {
//!     tracing::info!(queue = %delivery.queue(), "received");
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod publisher;
mod source;

pub use publisher::RedpandaPublisher;
pub use source::{RedpandaMessageSource, RedpandaMessageSourceBuilder};
