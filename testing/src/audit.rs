//! In-memory audit index.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use banking_ledger_core::BoxFuture;
use banking_ledger_core::audit::{AuditError, AuditIndex, AuditRecord, HISTORY_PAGE_SIZE, HistoryPage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Inner {
    documents: Mutex<Vec<(String, AuditRecord)>>,
    failures: Mutex<VecDeque<AuditError>>,
    reachable: AtomicBool,
}

/// In-memory [`AuditIndex`] that records every document with its index name.
///
/// Failures can be queued with [`InMemoryAuditIndex::fail_next`]; each queued
/// error is returned by one `index` call, in order.
#[derive(Debug, Clone)]
pub struct InMemoryAuditIndex {
    inner: Arc<Inner>,
}

impl Default for InMemoryAuditIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuditIndex {
    /// Create an empty, reachable index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: Mutex::new(Vec::new()),
                failures: Mutex::new(VecDeque::new()),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// Make the next `index` call fail with `error`.
    pub fn fail_next(&self, error: AuditError) {
        self.inner.failures.lock().unwrap().push_back(error);
    }

    /// Make `ping` succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Every stored record, in write order.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.inner
            .documents
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Every stored record with the index it was written to.
    #[must_use]
    pub fn documents(&self) -> Vec<(String, AuditRecord)> {
        self.inner.documents.lock().unwrap().clone()
    }

    /// Records carrying `transaction_id`.
    #[must_use]
    pub fn records_for(&self, transaction_id: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.transaction_id == transaction_id)
            .collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.documents.lock().unwrap().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditIndex for InMemoryAuditIndex {
    fn index<'a>(
        &'a self,
        index: &'a str,
        record: &'a AuditRecord,
    ) -> BoxFuture<'a, Result<(), AuditError>> {
        Box::pin(async move {
            if let Some(error) = self.inner.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.inner
                .documents
                .lock()
                .unwrap()
                .push((index.to_string(), record.clone()));
            Ok(())
        })
    }

    fn find_by_transaction_id<'a>(
        &'a self,
        transaction_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AuditRecord>, AuditError>> {
        Box::pin(async move { Ok(self.records_for(transaction_id)) })
    }

    fn history<'a>(
        &'a self,
        account_number: &'a str,
        page: usize,
    ) -> BoxFuture<'a, Result<HistoryPage, AuditError>> {
        Box::pin(async move {
            let page = page.max(1);
            let mut records: Vec<AuditRecord> = self
                .records()
                .into_iter()
                .filter(|r| r.account_number == account_number)
                .collect();
            // Stable sort keeps write order for equal timestamps; reverse for newest first.
            records.reverse();
            records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

            let total = records.len();
            let records = records
                .into_iter()
                .skip((page - 1) * HISTORY_PAGE_SIZE)
                .take(HISTORY_PAGE_SIZE)
                .collect();

            Ok(HistoryPage {
                account_number: account_number.to_string(),
                records,
                total,
                page,
            })
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), AuditError>> {
        Box::pin(async move {
            if self.inner.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AuditError::Request("connection refused".to_string()))
            }
        })
    }
}
