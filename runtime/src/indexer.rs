//! Audit indexer: best-effort writes of audit records.
//!
//! The ledger-side outcome is final by the time a record is written, so an
//! audit failure is retried a bounded number of times, then logged and
//! counted. It never reaches the caller.

use crate::metrics::ProcessorMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use banking_ledger_core::audit::{AuditError, AuditIndex, AuditRecord, index_name};
use banking_ledger_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Writes [`AuditRecord`]s into the daily index of the write time.
#[derive(Clone)]
pub struct AuditIndexer {
    index: Arc<dyn AuditIndex>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl AuditIndexer {
    /// Create an indexer retrying transient failures twice.
    #[must_use]
    pub fn new(index: Arc<dyn AuditIndex>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index,
            clock,
            policy: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(1))
                .build(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The clock used for index partitioning.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Write `record`, returning whether it was stored.
    pub async fn record(&self, record: &AuditRecord) -> bool {
        let index = index_name(self.clock.now());

        let result = retry_with_predicate(
            &self.policy,
            "audit index write",
            || self.index.index(&index, record),
            AuditError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    index = %index,
                    transaction_id = %record.transaction_id,
                    status = %record.status,
                    "Indexed audit record"
                );
                ProcessorMetrics::record_audit(true);
                true
            }
            Err(e) => {
                tracing::warn!(
                    index = %index,
                    transaction_id = %record.transaction_id,
                    account_number = %record.account_number,
                    status = %record.status,
                    error = %e,
                    "Failed to index audit record"
                );
                ProcessorMetrics::record_audit(false);
                false
            }
        }
    }
}

impl std::fmt::Debug for AuditIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditIndexer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
