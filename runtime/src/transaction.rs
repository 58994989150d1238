//! Transaction processor: locked read-modify-write of account balances.
//!
//! Each intent runs `BEGIN → LOCK_ROW → VALIDATE → MUTATE → COMMIT`, then an
//! audit record is written whatever the outcome. The row lock is what makes
//! concurrent withdrawals against one account safe; message order is never
//! relied upon.
//!
//! The ledger mutation and the audit write are independent: a committed
//! mutation is never undone because the audit index is down, and a failed
//! mutation still leaves a `FAILED` record behind.

use crate::error::TransactionError;
use crate::indexer::AuditIndexer;
use crate::metrics::ProcessorMetrics;
use banking_ledger_core::Decimal;
use banking_ledger_core::account::{BALANCE_SCALE, max_balance};
use banking_ledger_core::audit::{AuditRecord, AuditStatus};
use banking_ledger_core::ledger::LedgerStore;
use banking_ledger_core::message::{TransactionIntent, TransactionType};
use std::sync::Arc;
use std::time::Instant;

/// Result of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOutcome {
    /// Always [`AuditStatus::Completed`] for a returned outcome
    pub status: AuditStatus,
    /// Balance after the mutation
    pub balance_after: Decimal,
}

/// Compute the balance resulting from applying `intent` to `current`.
///
/// # Errors
///
/// - [`TransactionError::InvalidType`] for anything but `DEPOSIT` / `WITHDRAWAL`
/// - [`TransactionError::NonPositiveAmount`] if the amount is zero or negative
/// - [`TransactionError::InvalidPrecision`] if the amount has sub-cent digits
/// - [`TransactionError::InsufficientFunds`] if a withdrawal exceeds `current`
/// - [`TransactionError::AmountOutOfRange`] if a deposit would overflow the balance
pub fn next_balance(intent: &TransactionIntent, current: Decimal) -> Result<Decimal, TransactionError> {
    let kind = intent
        .kind()
        .ok_or_else(|| TransactionError::InvalidType(intent.transaction_type.clone()))?;

    if intent.amount <= Decimal::ZERO {
        return Err(TransactionError::NonPositiveAmount(intent.amount));
    }
    if intent.amount.normalize().scale() > BALANCE_SCALE {
        return Err(TransactionError::InvalidPrecision(intent.amount));
    }

    match kind {
        TransactionType::Deposit => current
            .checked_add(intent.amount)
            .filter(|balance| *balance <= max_balance())
            .ok_or(TransactionError::AmountOutOfRange(intent.amount)),
        TransactionType::Withdrawal if current < intent.amount => {
            Err(TransactionError::InsufficientFunds {
                available: current,
                requested: intent.amount,
            })
        }
        TransactionType::Withdrawal => current
            .checked_sub(intent.amount)
            .ok_or(TransactionError::AmountOutOfRange(intent.amount)),
    }
}

/// What the processor knew about the account when it stopped.
#[derive(Debug, Default)]
struct LastKnown {
    balance: Decimal,
    branch_code: Option<String>,
}

/// Applies deposits and withdrawals to the ledger.
pub struct TransactionProcessor {
    store: Arc<dyn LedgerStore>,
    indexer: AuditIndexer,
}

impl TransactionProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, indexer: AuditIndexer) -> Self {
        Self { store, indexer }
    }

    /// Apply `intent` and audit the outcome.
    ///
    /// The audit write has been attempted by the time this returns, on both
    /// the success and the failure path.
    ///
    /// # Errors
    ///
    /// Returns the [`TransactionError`] that aborted the transaction; the
    /// ledger is left unchanged.
    pub async fn process(&self, intent: &TransactionIntent) -> Result<TransactionOutcome, TransactionError> {
        let started = Instant::now();
        let mut last_known = LastKnown::default();

        let result = self.apply(intent, &mut last_known).await;
        ProcessorMetrics::record_transaction(result.is_ok(), started.elapsed());

        let record = match &result {
            Ok(outcome) => {
                tracing::info!(
                    transaction_id = %intent.transaction_id,
                    account_number = %intent.account_number,
                    transaction_type = %intent.transaction_type,
                    amount = %intent.amount,
                    balance_after = %outcome.balance_after,
                    "Transaction completed"
                );
                self.audit_record(intent, AuditStatus::Completed, outcome.balance_after, last_known.branch_code, None)
            }
            Err(e) => self.audit_record(
                intent,
                AuditStatus::Failed,
                last_known.balance,
                last_known.branch_code,
                Some(e.to_string()),
            ),
        };
        self.indexer.record(&record).await;

        result
    }

    async fn apply(
        &self,
        intent: &TransactionIntent,
        last_known: &mut LastKnown,
    ) -> Result<TransactionOutcome, TransactionError> {
        let mut tx = self.store.begin().await?;

        let snapshot = tx.lock_active_account(&intent.account_number).await?;
        last_known.balance = snapshot.balance;
        last_known.branch_code = Some(snapshot.branch_code);

        let new_balance = match next_balance(intent, snapshot.balance) {
            Ok(balance) => balance,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        transaction_id = %intent.transaction_id,
                        error = %rollback_err,
                        "Rollback failed after rejection"
                    );
                }
                return Err(e);
            }
        };

        // From here on a failure reports the balance the mutation would have produced.
        last_known.balance = new_balance;
        tx.update_balance(&intent.account_number, new_balance).await?;
        tx.commit().await?;

        Ok(TransactionOutcome {
            status: AuditStatus::Completed,
            balance_after: new_balance,
        })
    }

    fn audit_record(
        &self,
        intent: &TransactionIntent,
        status: AuditStatus,
        balance_after: Decimal,
        stored_branch: Option<String>,
        description: Option<String>,
    ) -> AuditRecord {
        AuditRecord {
            transaction_id: intent.transaction_id.clone(),
            account_number: intent.account_number.clone(),
            amount: intent.amount,
            transaction_type: intent.transaction_type.clone(),
            status,
            timestamp: self.indexer.clock().now(),
            branch_code: stored_branch
                .or_else(|| intent.branch_code.clone())
                .unwrap_or_default(),
            balance_after,
            description,
        }
    }
}
