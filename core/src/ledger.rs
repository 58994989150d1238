//! Ledger store abstraction.
//!
//! The ledger store is the authoritative, transactional store of account
//! balances. Balance mutations happen inside a [`LedgerTransaction`]; the row
//! lock taken by [`LedgerTransaction::lock_active_account`] serializes
//! concurrent transactions against the same account while transactions against
//! different accounts proceed in parallel.
//!
//! # Rollback discipline
//!
//! A transaction handle that is dropped without [`LedgerTransaction::commit`]
//! rolls back. Early returns via `?` and panics therefore never leave partial
//! writes behind. [`execute_in_transaction`] adds an explicit rollback on error.
//!
//! # Implementations
//!
//! - `PostgresLedgerStore` (in `banking-ledger-postgres`): production, pooled
//! - `InMemoryLedger` (in `banking-ledger-testing`): tests

use crate::BoxFuture;
use crate::account::{Account, AccountSnapshot, AccountStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur during ledger store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Could not obtain a connection or begin a transaction
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed
    #[error("Query error: {0}")]
    Query(String),

    /// The transaction could not be committed
    #[error("Commit failed: {0}")]
    Commit(String),

    /// No `ACTIVE` account with this number exists
    #[error("Account {0} not found or not active")]
    AccountNotFound(String),

    /// An account with this number already exists
    #[error("Account {0} already exists")]
    DuplicateAccount(String),
}

impl LedgerError {
    /// Whether this is an infrastructure failure rather than a missing or
    /// conflicting row.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Query(_) | Self::Commit(_))
    }
}

/// An open ledger transaction.
///
/// Dropping the handle without committing rolls the transaction back.
pub trait LedgerTransaction: Send {
    /// Read the balance and branch of an `ACTIVE` account, holding an exclusive
    /// row lock until the transaction ends.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountNotFound`] if no `ACTIVE` account matches
    /// - [`LedgerError::Query`] if the read fails
    fn lock_active_account(
        &mut self,
        account_number: &str,
    ) -> BoxFuture<'_, Result<AccountSnapshot, LedgerError>>;

    /// Set the available balance of an account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the update fails (including a
    /// negative balance rejected by the store).
    fn update_balance(
        &mut self,
        account_number: &str,
        balance: Decimal,
    ) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Insert a new account row.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateAccount`] if the account number is taken
    /// - [`LedgerError::Query`] if the insert fails
    fn insert_account(&mut self, account: &Account) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Commit`] if the commit fails; nothing is persisted.
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), LedgerError>>;

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Connection`] if the rollback could not be sent.
    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), LedgerError>>;
}

/// An open transaction as handed out by [`LedgerStore::begin`].
pub type TransactionHandle = Box<dyn LedgerTransaction>;

/// The relational ledger store.
///
/// Implementations must be safe to share across workers: each call checks a
/// connection out of a pool, so concurrent transactions do not serialize on a
/// single connection.
pub trait LedgerStore: Send + Sync {
    /// Begin a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Connection`] if no connection is available.
    fn begin(&self) -> BoxFuture<'_, Result<TransactionHandle, LedgerError>>;

    /// Insert an account outside of a caller-managed transaction.
    ///
    /// The default runs the insert in its own transaction; stores with a
    /// cheaper autocommit path override it.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateAccount`] if the account number is taken
    /// - [`LedgerError::Connection`], [`LedgerError::Query`] or
    ///   [`LedgerError::Commit`] on infrastructure failure
    fn insert_account<'a>(&'a self, account: &'a Account) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            tx.insert_account(account).await?;
            tx.commit().await
        })
    }

    /// Load an account by number, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the read fails.
    fn fetch_account<'a>(
        &'a self,
        account_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<Account>, LedgerError>>;

    /// Change an account's status outside of any transaction.
    ///
    /// This is the administrative write path; balances are never changed here.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountNotFound`] if no account matches
    /// - [`LedgerError::Query`] if the update fails
    fn set_account_status<'a>(
        &'a self,
        account_number: &'a str,
        status: AccountStatus,
    ) -> BoxFuture<'a, Result<(), LedgerError>>;
}

/// Run `f` inside a ledger transaction.
///
/// Begins a transaction, invokes `f` with the handle, commits if `f` returns
/// `Ok` and rolls back otherwise. A commit failure is returned as the error.
///
/// Closures must own what they capture (clone inputs before the call); the
/// returned future may only borrow the transaction handle.
///
/// # Errors
///
/// Returns the error produced by `f`, or the [`LedgerError`] from begin/commit
/// converted into `E`.
///
/// # Example
///
/// ```ignore
/// let account = account.clone();
/// execute_in_transaction(store, move |tx| {
///     Box::pin(async move { tx.insert_account(&account).await })
/// })
/// .await?;
/// ```
pub async fn execute_in_transaction<S, F, T, E>(store: &S, f: F) -> Result<T, E>
where
    S: LedgerStore + ?Sized,
    F: for<'t> FnOnce(&'t mut TransactionHandle) -> BoxFuture<'t, Result<T, E>>,
    E: From<LedgerError>,
{
    let mut tx = store.begin().await?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed after transaction error");
            }
            Err(err)
        }
    }
}
