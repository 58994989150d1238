//! In-memory ledger store.
//!
//! Behaves like the relational store where the processors can observe it:
//! - `lock_active_account` takes a real per-account lock held until the
//!   transaction ends, so concurrent transactions on one account serialize
//! - writes are staged and only applied on commit; dropping a transaction
//!   discards them
//! - a negative balance is rejected like a `CHECK (available_balance >= 0)`
//! - duplicate account numbers are rejected like a primary-key violation

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use banking_ledger_core::BoxFuture;
use banking_ledger_core::account::{Account, AccountSnapshot, AccountStatus};
use banking_ledger_core::ledger::{LedgerError, LedgerStore, LedgerTransaction, TransactionHandle};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Inner {
    accounts: Mutex<HashMap<String, Account>>,
    row_locks: Mutex<HashMap<String, Arc<RowLock<()>>>>,
    fail_begin: AtomicBool,
    fail_update: AtomicBool,
    fail_commit: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Inner {
    fn row_lock(&self, account_number: &str) -> Arc<RowLock<()>> {
        let mut locks = self.row_locks.lock().unwrap();
        Arc::clone(locks.entry(account_number.to_string()).or_default())
    }
}

/// In-memory [`LedgerStore`] for fast, deterministic tests.
///
/// Clones share the same state.
///
/// # Example
///
/// ```
/// use banking_ledger_testing::InMemoryLedger;
/// use banking_ledger_core::ledger::LedgerStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = InMemoryLedger::new();
/// assert!(ledger.fetch_account("BR10000001").await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account directly, bypassing transactions.
    pub fn insert(&self, account: Account) {
        self.inner
            .accounts
            .lock()
            .unwrap()
            .insert(account.account_number.clone(), account);
    }

    /// Committed state of an account.
    #[must_use]
    pub fn account(&self, account_number: &str) -> Option<Account> {
        self.inner.accounts.lock().unwrap().get(account_number).cloned()
    }

    /// Committed balance of an account.
    #[must_use]
    pub fn balance(&self, account_number: &str) -> Option<Decimal> {
        self.account(account_number).map(|a| a.available_balance)
    }

    /// Sum of every committed balance.
    #[must_use]
    pub fn total_balance(&self) -> Decimal {
        self.inner
            .accounts
            .lock()
            .unwrap()
            .values()
            .map(|a| a.available_balance)
            .sum()
    }

    /// All committed accounts.
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        self.inner.accounts.lock().unwrap().values().cloned().collect()
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.accounts.lock().unwrap().len()
    }

    /// Whether the ledger holds no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `begin` fail with a connection error.
    pub fn fail_next_begin(&self) {
        self.inner.fail_begin.store(true, Ordering::SeqCst);
    }

    /// Make the next `update_balance` fail with a query error.
    pub fn fail_next_update(&self) {
        self.inner.fail_update.store(true, Ordering::SeqCst);
    }

    /// Make the next `commit` fail; its staged writes are discarded.
    pub fn fail_next_commit(&self) {
        self.inner.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Number of transactions that ended without committing.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }
}

impl LedgerStore for InMemoryLedger {
    fn begin(&self) -> BoxFuture<'_, Result<TransactionHandle, LedgerError>> {
        Box::pin(async move {
            if self.inner.fail_begin.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::Connection("connection pool exhausted".to_string()));
            }

            let tx: TransactionHandle = Box::new(InMemoryTransaction {
                inner: Arc::clone(&self.inner),
                held: HashMap::new(),
                balances: HashMap::new(),
                inserts: Vec::new(),
                finished: false,
            });
            Ok(tx)
        })
    }

    fn fetch_account<'a>(
        &'a self,
        account_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<Account>, LedgerError>> {
        Box::pin(async move { Ok(self.account(account_number)) })
    }

    fn set_account_status<'a>(
        &'a self,
        account_number: &'a str,
        status: AccountStatus,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move {
            // Waits for in-flight transactions on the account, like UPDATE would.
            let lock = self.inner.row_lock(account_number);
            let _guard = lock.lock().await;

            let mut accounts = self.inner.accounts.lock().unwrap();
            let account = accounts
                .get_mut(account_number)
                .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;
            account.status = status;
            account.updated_at = Utc::now();
            Ok(())
        })
    }
}

struct InMemoryTransaction {
    inner: Arc<Inner>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    balances: HashMap<String, Decimal>,
    inserts: Vec<Account>,
    finished: bool,
}

impl InMemoryTransaction {
    fn exists(&self, account_number: &str) -> bool {
        self.inserts.iter().any(|a| a.account_number == account_number)
            || self.inner.accounts.lock().unwrap().contains_key(account_number)
    }
}

impl LedgerTransaction for InMemoryTransaction {
    fn lock_active_account(
        &mut self,
        account_number: &str,
    ) -> BoxFuture<'_, Result<AccountSnapshot, LedgerError>> {
        let account_number = account_number.to_string();
        Box::pin(async move {
            if !self.held.contains_key(&account_number) {
                let guard = self.inner.row_lock(&account_number).lock_owned().await;
                self.held.insert(account_number.clone(), guard);
            }

            let stored = self.inner.accounts.lock().unwrap().get(&account_number).cloned();
            let account = stored
                .or_else(|| {
                    self.inserts
                        .iter()
                        .find(|a| a.account_number == account_number)
                        .cloned()
                })
                .filter(|a| a.status == AccountStatus::Active)
                .ok_or_else(|| LedgerError::AccountNotFound(account_number.clone()))?;

            let balance = self
                .balances
                .get(&account_number)
                .copied()
                .unwrap_or(account.available_balance);

            Ok(AccountSnapshot {
                balance,
                branch_code: account.branch_code,
            })
        })
    }

    fn update_balance(
        &mut self,
        account_number: &str,
        balance: Decimal,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let account_number = account_number.to_string();
        Box::pin(async move {
            if self.inner.fail_update.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::Query("connection reset during update".to_string()));
            }
            if balance < Decimal::ZERO {
                return Err(LedgerError::Query(format!(
                    "new row for account {account_number} violates check constraint \"accounts_available_balance_check\""
                )));
            }
            if !self.exists(&account_number) {
                return Err(LedgerError::AccountNotFound(account_number));
            }

            self.balances.insert(account_number, balance);
            Ok(())
        })
    }

    fn insert_account(&mut self, account: &Account) -> BoxFuture<'_, Result<(), LedgerError>> {
        let account = account.clone();
        Box::pin(async move {
            if self.exists(&account.account_number) {
                return Err(LedgerError::DuplicateAccount(account.account_number));
            }
            self.inserts.push(account);
            Ok(())
        })
    }

    fn commit(mut self: Box<Self>) -> BoxFuture<'static, Result<(), LedgerError>> {
        Box::pin(async move {
            if self.inner.fail_commit.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::Commit("could not serialize access".to_string()));
            }

            {
                let mut accounts = self.inner.accounts.lock().unwrap();

                if let Some(dup) = self
                    .inserts
                    .iter()
                    .find(|a| accounts.contains_key(&a.account_number))
                {
                    return Err(LedgerError::DuplicateAccount(dup.account_number.clone()));
                }

                for account in self.inserts.drain(..) {
                    accounts.insert(account.account_number.clone(), account);
                }

                let now = Utc::now();
                for (number, balance) in self.balances.drain() {
                    if let Some(account) = accounts.get_mut(&number) {
                        account.available_balance = balance;
                        account.updated_at = now;
                    }
                }
            }

            self.finished = true;
            self.inner.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), LedgerError>> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_clock;
    use banking_ledger_core::environment::Clock;
    use std::time::Duration;

    fn account(number: &str, balance: i64) -> Account {
        Account::open(
            number.to_string(),
            "Test Holder".to_string(),
            Decimal::new(balance, 0),
            "BR1".to_string(),
            test_clock().now(),
        )
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded_on_drop() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 100));

        {
            let mut tx = ledger.begin().await.expect("begin");
            tx.lock_active_account("BR10000001").await.expect("lock");
            tx.update_balance("BR10000001", Decimal::new(40, 0))
                .await
                .expect("update");
        }

        assert_eq!(ledger.balance("BR10000001"), Some(Decimal::new(100, 0)));
        assert_eq!(ledger.rollbacks(), 1);
        assert_eq!(ledger.commits(), 0);
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 100));

        let mut tx = ledger.begin().await.expect("begin");
        let snapshot = tx.lock_active_account("BR10000001").await.expect("lock");
        assert_eq!(snapshot.balance, Decimal::new(100, 0));
        assert_eq!(snapshot.branch_code, "BR1");

        tx.update_balance("BR10000001", Decimal::new(150, 0))
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        assert_eq!(ledger.balance("BR10000001"), Some(Decimal::new(150, 0)));
        assert_eq!(ledger.commits(), 1);
    }

    #[tokio::test]
    async fn negative_balance_is_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 10));

        let mut tx = ledger.begin().await.expect("begin");
        let err = tx
            .update_balance("BR10000001", Decimal::new(-1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Query(_)));
    }

    #[tokio::test]
    async fn inactive_accounts_cannot_be_locked() {
        let ledger = InMemoryLedger::new();
        let mut frozen = account("BR10000001", 10);
        frozen.status = AccountStatus::Frozen;
        ledger.insert(frozen);

        let mut tx = ledger.begin().await.expect("begin");
        assert_eq!(
            tx.lock_active_account("BR10000001").await.unwrap_err(),
            LedgerError::AccountNotFound("BR10000001".to_string())
        );
        assert_eq!(
            tx.lock_active_account("BR19999999").await.unwrap_err(),
            LedgerError::AccountNotFound("BR19999999".to_string())
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 10));

        let mut tx = ledger.begin().await.expect("begin");
        let err = tx
            .insert_account(&account("BR10000001", 5))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateAccount("BR10000001".to_string()));
    }

    #[tokio::test]
    async fn row_lock_serializes_transactions_on_one_account() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 10));

        let mut first = ledger.begin().await.expect("begin");
        first.lock_active_account("BR10000001").await.expect("lock");

        let contender = ledger.clone();
        let waiter = tokio::spawn(async move {
            let mut second = contender.begin().await.expect("begin");
            second
                .lock_active_account("BR10000001")
                .await
                .expect("lock")
                .balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first
            .update_balance("BR10000001", Decimal::new(3, 0))
            .await
            .expect("update");
        first.commit().await.expect("commit");

        assert_eq!(waiter.await.expect("join"), Decimal::new(3, 0));
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_writes() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 10));
        ledger.fail_next_commit();

        let mut tx = ledger.begin().await.expect("begin");
        tx.lock_active_account("BR10000001").await.expect("lock");
        tx.update_balance("BR10000001", Decimal::new(20, 0))
            .await
            .expect("update");

        assert!(matches!(tx.commit().await, Err(LedgerError::Commit(_))));
        assert_eq!(ledger.balance("BR10000001"), Some(Decimal::new(10, 0)));
    }

    #[tokio::test]
    async fn status_change_applies() {
        let ledger = InMemoryLedger::new();
        ledger.insert(account("BR10000001", 10));

        ledger
            .set_account_status("BR10000001", AccountStatus::Deactivated)
            .await
            .expect("status");

        assert_eq!(
            ledger.account("BR10000001").map(|a| a.status),
            Some(AccountStatus::Deactivated)
        );
        assert!(
            ledger
                .set_account_status("BR19999999", AccountStatus::Frozen)
                .await
                .is_err()
        );
    }
}
