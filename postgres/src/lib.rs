//! `PostgreSQL` adapters for the banking ledger.
//!
//! - [`PostgresLedgerStore`]: the authoritative account store, with
//!   pooled transactions and `SELECT ... FOR UPDATE` row locks
//! - [`PostgresDeadLetterQueue`]: durable storage for messages that could
//!   not be processed
//!
//! Both use runtime-checked `sqlx` queries and share one `PgPool`. The schema
//! is embedded as migrations and applied with [`PostgresLedgerStore::migrate`].
//!
//! # Example
//!
//! ```no_run
//! use banking_ledger_postgres::{PostgresDeadLetterQueue, PostgresLedgerStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresLedgerStore::connect("postgres://localhost/ledger", 10).await?;
//! store.migrate().await?;
//! let dlq = PostgresDeadLetterQueue::new(store.pool().clone());
//! # Ok(())
//! # }
//! ```

mod dead_letter_queue;
mod ledger;

pub use dead_letter_queue::{DeadLetterStatus, FailedMessage, PostgresDeadLetterQueue};
pub use ledger::PostgresLedgerStore;
