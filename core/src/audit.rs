//! Audit records and the audit index abstraction.
//!
//! One [`AuditRecord`] is written per processing attempt into a collection
//! named after the UTC calendar day of the write (`bank-transactions-YYYY-MM-DD`).
//! Records are write-once; the audit index is eventually consistent with the
//! ledger store and is authoritative only for history and search.

use crate::BoxFuture;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix shared by every daily audit index.
pub const INDEX_PREFIX: &str = "bank-transactions-";

/// Pattern matching every daily audit index.
pub const INDEX_PATTERN: &str = "bank-transactions-*";

/// Records returned per history page.
pub const HISTORY_PAGE_SIZE: usize = 10;

/// Name of the daily index a record written at `at` belongs to.
#[must_use]
pub fn index_name(at: DateTime<Utc>) -> String {
    format!("{INDEX_PREFIX}{}", at.format("%Y-%m-%d"))
}

/// Outcome of a processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// The ledger mutation committed
    Completed,
    /// The attempt was rejected or failed
    Failed,
}

impl AuditStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The audit document describing one processing attempt.
///
/// `balance_after` is meaningful only for [`AuditStatus::Completed`]; failed
/// attempts carry the last-known balance and a `description` of the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Correlation / reference id of the attempt
    pub transaction_id: String,
    /// Account the attempt targeted
    pub account_number: String,
    /// Requested amount
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// `DEPOSIT`, `WITHDRAWAL`, or whatever unknown type was requested
    #[serde(rename = "type")]
    pub transaction_type: String,
    /// Outcome
    pub status: AuditStatus,
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
    /// Branch of the account
    pub branch_code: String,
    /// Resulting (or last-known) balance
    #[serde(rename = "balance_after_transaction", with = "rust_decimal::serde::float")]
    pub balance_after: Decimal,
    /// Rejection reason on failed attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AuditRecord {
    /// Name of the daily index this record belongs to.
    #[must_use]
    pub fn index_name(&self) -> String {
        index_name(self.timestamp)
    }

    /// Whether the attempt completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == AuditStatus::Completed
    }
}

/// One page of an account's audit history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Account the history belongs to
    pub account_number: String,
    /// Records on this page
    pub records: Vec<AuditRecord>,
    /// Total number of records for the account
    pub total: usize,
    /// 1-based page number
    pub page: usize,
}

/// Errors that can occur during audit index operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The request could not be sent (connection refused, timeout, ...)
    #[error("Audit index request failed: {0}")]
    Request(String),

    /// The index answered with an error status
    #[error("Audit index rejected request (status {status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// A record could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A response could not be parsed
    #[error("Response parsing failed: {0}")]
    Response(String),
}

impl AuditError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Serialization(_) | Self::Response(_) => false,
        }
    }
}

/// Time-partitioned document store for audit records.
///
/// # Implementations
///
/// - `ElasticsearchAuditIndex` (in `banking-ledger-elasticsearch`): production
/// - `InMemoryAuditIndex` (in `banking-ledger-testing`): tests
pub trait AuditIndex: Send + Sync {
    /// Append `record` to the collection named `index`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the record could not be stored.
    fn index<'a>(
        &'a self,
        index: &'a str,
        record: &'a AuditRecord,
    ) -> BoxFuture<'a, Result<(), AuditError>>;

    /// All records whose transaction id equals `transaction_id` exactly,
    /// across every daily index.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the search fails.
    fn find_by_transaction_id<'a>(
        &'a self,
        transaction_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AuditRecord>, AuditError>>;

    /// One page of the account's records, newest first.
    ///
    /// Pages are 1-based; a page below 1 is treated as page 1.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the search fails.
    fn history<'a>(
        &'a self,
        account_number: &'a str,
        page: usize,
    ) -> BoxFuture<'a, Result<HistoryPage, AuditError>>;

    /// Check that the index is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if it is not.
    fn ping(&self) -> BoxFuture<'_, Result<(), AuditError>>;
}
