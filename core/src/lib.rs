//! # Banking Ledger Core
//!
//! Domain types and collaborator traits for the message-driven ledger
//! processing pipeline.
//!
//! The pipeline consumes account-creation and transaction messages, applies
//! them to an authoritative ledger store, and mirrors every outcome into a
//! date-partitioned audit index.
//!
//! ## Modules
//!
//! - [`account`]: accounts, statuses, account-number generation
//! - [`message`]: inbound message payloads and their decoding
//! - [`audit`]: audit records and the [`audit::AuditIndex`] trait
//! - [`ledger`]: the [`ledger::LedgerStore`] / [`ledger::LedgerTransaction`] traits
//!   and [`ledger::execute_in_transaction`]
//! - [`source`]: message sources, deliveries and dead-letter sinks
//! - [`environment`]: injected clock
//!
//! ## Implementations
//!
//! - `banking-ledger-postgres`: `PostgresLedgerStore`, `PostgresDeadLetterQueue`
//! - `banking-ledger-redpanda`: `RedpandaMessageSource`
//! - `banking-ledger-elasticsearch`: `ElasticsearchAuditIndex`
//! - `banking-ledger-testing`: in-memory versions of all of the above

use std::future::Future;
use std::pin::Pin;

pub mod account;
pub mod audit;
pub mod ledger;
pub mod message;
pub mod source;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;

/// Boxed, `Send` future returned by the object-safe collaborator traits.
///
/// The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so they
/// can be used as `Arc<dyn LedgerStore>`, `Arc<dyn AuditIndex>` and so on.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment module - injected dependencies that are not collaborators.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use banking_ledger_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
