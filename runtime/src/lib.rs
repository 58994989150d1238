//! # Banking Ledger Runtime
//!
//! The message-driven processing pipeline.
//!
//! ## Core Components
//!
//! - **[`AccountProcessor`]**: validates and persists new accounts
//! - **[`TransactionProcessor`]**: locked read-modify-write of balances
//! - **[`AuditIndexer`]**: best-effort audit writes, never fatal to the caller
//! - **[`Dispatcher`]**: decodes, routes and acknowledges one message
//! - **[`WorkerPool`]**: N workers over one shared message source
//!
//! ## Example
//!
//! ```ignore
//! use banking_ledger_runtime::{AuditIndexer, Dispatcher, WorkerPool, WorkerPoolConfig};
//!
//! let indexer = AuditIndexer::new(audit_index, clock);
//! let dispatcher = Dispatcher::new(ledger_store, indexer).with_dead_letters(dlq);
//!
//! let pool = WorkerPool::new(&WorkerPoolConfig::default(), source, dispatcher).spawn();
//! // ...
//! pool.shutdown_and_join().await;
//! ```

/// Account creation
pub mod account;

/// Message routing and acknowledgement
pub mod dispatcher;

/// Error types for the processors and the dispatcher
pub mod error;

/// Best-effort audit writes
pub mod indexer;

/// Prometheus metrics for observability
pub mod metrics;

/// Worker pool
pub mod pool;

/// Retry logic with exponential backoff
pub mod retry;

/// Deposits and withdrawals
pub mod transaction;

pub use account::AccountProcessor;
pub use dispatcher::{Disposition, Dispatcher};
pub use error::{AccountError, ProcessError, TransactionError};
pub use indexer::AuditIndexer;
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use transaction::{TransactionOutcome, TransactionProcessor};
