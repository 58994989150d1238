//! Account processor: validates and persists new accounts.

use crate::error::AccountError;
use crate::indexer::AuditIndexer;
use crate::metrics::ProcessorMetrics;
use banking_ledger_core::Decimal;
use banking_ledger_core::account::{Account, AccountNumberGenerator, is_ledger_amount};
use banking_ledger_core::audit::{AuditRecord, AuditStatus};
use banking_ledger_core::ledger::{LedgerError, LedgerStore, execute_in_transaction};
use banking_ledger_core::message::{AccountRequest, TransactionType};
use std::sync::Arc;

/// Account numbers tried before giving up on a request.
pub const MAX_ACCOUNT_NUMBER_ATTEMPTS: usize = 5;

/// Longest branch code that still yields a well-formed account number.
pub const MAX_BRANCH_CODE_LEN: usize = 3;

/// Creates accounts and records each creation in the audit index.
///
/// The opening deposit is audited as a `DEPOSIT` whose amount and resulting
/// balance both equal the initial deposit.
pub struct AccountProcessor {
    store: Arc<dyn LedgerStore>,
    indexer: AuditIndexer,
    generator: AccountNumberGenerator,
    audit_failures: bool,
}

impl AccountProcessor {
    /// Create a processor that does not audit failed requests.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, indexer: AuditIndexer) -> Self {
        Self {
            store,
            indexer,
            generator: AccountNumberGenerator,
            audit_failures: false,
        }
    }

    /// Also write a `FAILED` audit record when a request is rejected.
    #[must_use]
    pub const fn with_failure_audit(mut self, enabled: bool) -> Self {
        self.audit_failures = enabled;
        self
    }

    /// Create the account described by `request`.
    ///
    /// # Errors
    ///
    /// - [`AccountError::NegativeInitialDeposit`], [`AccountError::InvalidInitialDeposit`]
    ///   or [`AccountError::InvalidBranchCode`] if the request is invalid; nothing is written
    /// - [`AccountError::AccountNumberExhausted`] if every candidate collided
    /// - [`AccountError::Ledger`] if the store failed; nothing is written
    pub async fn process(&self, request: &AccountRequest) -> Result<Account, AccountError> {
        let result = self.create(request).await;

        match &result {
            Ok(account) => {
                ProcessorMetrics::record_account(true);
                tracing::info!(
                    account_number = %account.account_number,
                    branch_code = %account.branch_code,
                    reference_id = %request.reference_id,
                    "Account created"
                );
                self.indexer.record(&self.opened(request, account)).await;
            }
            Err(e) => {
                ProcessorMetrics::record_account(false);
                if self.audit_failures {
                    self.indexer.record(&self.rejected(request, e)).await;
                }
            }
        }

        result
    }

    async fn create(&self, request: &AccountRequest) -> Result<Account, AccountError> {
        validate(request)?;

        for attempt in 0..MAX_ACCOUNT_NUMBER_ATTEMPTS {
            let now = self.indexer.clock().now();
            let account = Account::open(
                self.generator.candidate(&request.branch_code, attempt, now),
                request.account_holder_name.clone(),
                request.initial_deposit,
                request.branch_code.clone(),
                now,
            );

            let row = account.clone();
            let inserted = execute_in_transaction(self.store.as_ref(), move |tx| {
                Box::pin(async move { tx.insert_account(&row).await })
            })
            .await;

            match inserted {
                Ok(()) => return Ok(account),
                Err(LedgerError::DuplicateAccount(number)) => {
                    tracing::debug!(
                        attempt,
                        account_number = %number,
                        "Account number collision, regenerating"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AccountError::AccountNumberExhausted {
            branch_code: request.branch_code.clone(),
            attempts: MAX_ACCOUNT_NUMBER_ATTEMPTS,
        })
    }

    fn opened(&self, request: &AccountRequest, account: &Account) -> AuditRecord {
        AuditRecord {
            transaction_id: request.reference_id.clone(),
            account_number: account.account_number.clone(),
            amount: account.available_balance,
            transaction_type: TransactionType::Deposit.as_str().to_string(),
            status: AuditStatus::Completed,
            timestamp: self.indexer.clock().now(),
            branch_code: account.branch_code.clone(),
            balance_after: account.available_balance,
            description: None,
        }
    }

    fn rejected(&self, request: &AccountRequest, error: &AccountError) -> AuditRecord {
        AuditRecord {
            transaction_id: request.reference_id.clone(),
            account_number: String::new(),
            amount: request.initial_deposit,
            transaction_type: TransactionType::Deposit.as_str().to_string(),
            status: AuditStatus::Failed,
            timestamp: self.indexer.clock().now(),
            branch_code: request.branch_code.clone(),
            balance_after: Decimal::ZERO,
            description: Some(error.to_string()),
        }
    }
}

fn validate(request: &AccountRequest) -> Result<(), AccountError> {
    if request.initial_deposit < Decimal::ZERO {
        return Err(AccountError::NegativeInitialDeposit(request.initial_deposit));
    }
    if !is_ledger_amount(request.initial_deposit) {
        return Err(AccountError::InvalidInitialDeposit(request.initial_deposit));
    }

    let code = &request.branch_code;
    if code.is_empty()
        || code.len() > MAX_BRANCH_CODE_LEN
        || !code.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(AccountError::InvalidBranchCode(code.clone()));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use banking_ledger_core::account::{AccountStatus, format_account_number};
    use banking_ledger_core::environment::Clock;
    use banking_ledger_testing::fixtures::account_request;
    use banking_ledger_testing::{InMemoryAuditIndex, InMemoryLedger, test_clock};

    fn processor(ledger: &InMemoryLedger, audit: &InMemoryAuditIndex) -> AccountProcessor {
        let indexer = AuditIndexer::new(Arc::new(audit.clone()), Arc::new(test_clock()));
        AccountProcessor::new(Arc::new(ledger.clone()), indexer)
    }

    #[tokio::test]
    async fn creates_active_account_and_audits_opening_deposit() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();

        let account = processor(&ledger, &audit)
            .process(&account_request("ref-1", Decimal::new(100_000, 2)))
            .await
            .expect("account created");

        assert_eq!(account.account_number.len(), 10);
        assert!(account.account_number.starts_with("BR1"));
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(ledger.balance(&account.account_number), Some(Decimal::new(100_000, 2)));

        let records = audit.records_for("ref-1");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, AuditStatus::Completed);
        assert_eq!(record.transaction_type, "DEPOSIT");
        assert_eq!(record.account_number, account.account_number);
        assert_eq!(record.amount, Decimal::new(100_000, 2));
        assert_eq!(record.balance_after, Decimal::new(100_000, 2));
    }

    #[tokio::test]
    async fn zero_initial_deposit_is_allowed() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();

        let account = processor(&ledger, &audit)
            .process(&account_request("ref-0", Decimal::ZERO))
            .await
            .expect("account created");
        assert_eq!(account.available_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn negative_initial_deposit_has_no_side_effects() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();

        let err = processor(&ledger, &audit)
            .process(&account_request("ref-2", Decimal::new(-1, 0)))
            .await
            .unwrap_err();

        assert_eq!(err, AccountError::NegativeInitialDeposit(Decimal::new(-1, 0)));
        assert!(ledger.is_empty());
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn sub_cent_or_oversized_initial_deposit_is_rejected() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();
        let processor = processor(&ledger, &audit);

        for deposit in [Decimal::new(1_001, 3), Decimal::MAX] {
            assert_eq!(
                processor.process(&account_request("ref", deposit)).await.unwrap_err(),
                AccountError::InvalidInitialDeposit(deposit)
            );
        }
        assert!(ledger.is_empty());

        // Trailing zeros are not extra precision.
        processor
            .process(&account_request("ref", Decimal::new(1_000, 3)))
            .await
            .expect("1.000 is a whole unit");
    }

    #[tokio::test]
    async fn invalid_branch_codes_are_rejected() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();
        let processor = processor(&ledger, &audit);

        for code in ["", "BR12", "B-1"] {
            let mut request = account_request("ref", Decimal::ONE);
            request.branch_code = code.to_string();
            assert_eq!(
                processor.process(&request).await.unwrap_err(),
                AccountError::InvalidBranchCode(code.to_string())
            );
        }
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn collision_regenerates_account_number() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();

        // Occupy the time-derived candidate the first attempt will produce.
        let taken = AccountNumberGenerator.candidate("BR1", 0, test_clock().now());
        ledger.insert(Account::open(
            taken.clone(),
            "Existing".to_string(),
            Decimal::ONE,
            "BR1".to_string(),
            test_clock().now(),
        ));

        let account = processor(&ledger, &audit)
            .process(&account_request("ref-3", Decimal::TEN))
            .await
            .expect("second candidate succeeds");

        assert_ne!(account.account_number, taken);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.balance(&taken), Some(Decimal::ONE));
    }

    #[tokio::test]
    async fn ledger_failure_is_not_audited_by_default() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();
        ledger.fail_next_begin();

        let err = processor(&ledger, &audit)
            .process(&account_request("ref-4", Decimal::TEN))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(ledger.is_empty());
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn failure_audit_records_the_rejection() {
        let ledger = InMemoryLedger::new();
        let audit = InMemoryAuditIndex::new();
        ledger.fail_next_commit();

        let processor = processor(&ledger, &audit).with_failure_audit(true);
        processor
            .process(&account_request("ref-5", Decimal::TEN))
            .await
            .unwrap_err();

        let records = audit.records_for("ref-5");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Failed);
        assert_eq!(records[0].account_number, "");
        assert_eq!(records[0].balance_after, Decimal::ZERO);
        assert!(records[0].description.as_deref().is_some_and(|d| d.contains("Commit failed")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn account_number_shape_for_three_letter_branch() {
        assert_eq!(format_account_number("BR1", 7).len(), 10);
    }
}
