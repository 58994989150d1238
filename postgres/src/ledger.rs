//! `PostgreSQL` ledger store.
//!
//! Every transaction checks a connection out of the pool, so transactions on
//! different accounts run in parallel and only contend on row locks. The row
//! lock is `SELECT ... FOR UPDATE`, held until commit or rollback.
//!
//! A [`sqlx::Transaction`] that is dropped without commit is rolled back when
//! its connection returns to the pool.

use banking_ledger_core::BoxFuture;
use banking_ledger_core::account::{Account, AccountSnapshot, AccountStatus};
use banking_ledger_core::ledger::{LedgerError, LedgerStore, LedgerTransaction, TransactionHandle};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;

/// `PostgreSQL`-backed [`LedgerStore`].
///
/// # Example
///
/// ```no_run
/// use banking_ledger_postgres::PostgresLedgerStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresLedgerStore::connect("postgres://localhost/ledger", 10).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Connect a pool of at most `max_connections` connections.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Connection`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "Connected to ledger database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, shared with the dead-letter queue.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Query(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn begin(&self) -> BoxFuture<'_, Result<TransactionHandle, LedgerError>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LedgerError::Connection(format!("Failed to start transaction: {e}")))?;
            let handle: TransactionHandle = Box::new(PgLedgerTransaction { tx });
            Ok(handle)
        })
    }

    fn insert_account<'a>(&'a self, account: &'a Account) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move {
            insert_query(account)
                .execute(&self.pool)
                .await
                .map_err(|e| insert_error(&account.account_number, e))?;
            Ok(())
        })
    }

    fn fetch_account<'a>(
        &'a self,
        account_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<Account>, LedgerError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT account_number, account_holder_name, available_balance,
                       branch_code, status, created_at, updated_at
                FROM accounts
                WHERE account_number = $1
                ",
            )
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to fetch account: {e}")))?;

            row.as_ref().map(row_to_account).transpose()
        })
    }

    fn set_account_status<'a>(
        &'a self,
        account_number: &'a str,
        status: AccountStatus,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE accounts
                SET status = $2, updated_at = NOW()
                WHERE account_number = $1
                ",
            )
            .bind(account_number)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to update account status: {e}")))?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::AccountNotFound(account_number.to_string()));
            }

            tracing::info!(account_number, status = status.as_str(), "Account status updated");
            Ok(())
        })
    }
}

struct PgLedgerTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl LedgerTransaction for PgLedgerTransaction {
    fn lock_active_account(
        &mut self,
        account_number: &str,
    ) -> BoxFuture<'_, Result<AccountSnapshot, LedgerError>> {
        let account_number = account_number.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT available_balance, branch_code
                FROM accounts
                WHERE account_number = $1 AND status = 'ACTIVE'
                FOR UPDATE
                ",
            )
            .bind(&account_number)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to lock account: {e}")))?
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.clone()))?;

            Ok(AccountSnapshot {
                balance: column(&row, "available_balance")?,
                branch_code: column(&row, "branch_code")?,
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
            let result = sqlx::query(
                r"
                UPDATE accounts
                SET available_balance = $2, updated_at = NOW()
                WHERE account_number = $1
                ",
            )
            .bind(&account_number)
            .bind(balance)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to update balance: {e}")))?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::AccountNotFound(account_number));
            }
            Ok(())
        })
    }

    fn insert_account(&mut self, account: &Account) -> BoxFuture<'_, Result<(), LedgerError>> {
        let account = account.clone();
        Box::pin(async move {
            insert_query(&account)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| insert_error(&account.account_number, e))?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), LedgerError>> {
        Box::pin(async move {
            self.tx
                .commit()
                .await
                .map_err(|e| LedgerError::Commit(e.to_string()))
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), LedgerError>> {
        Box::pin(async move {
            self.tx
                .rollback()
                .await
                .map_err(|e| LedgerError::Connection(format!("Failed to roll back: {e}")))
        })
    }
}

fn insert_query(account: &Account) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r"
        INSERT INTO accounts (
            account_number, account_holder_name, available_balance,
            branch_code, status, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(&account.account_number)
    .bind(&account.account_holder_name)
    .bind(account.available_balance)
    .bind(&account.branch_code)
    .bind(account.status.as_str())
    .bind(account.created_at)
    .bind(account.updated_at)
}

fn insert_error(account_number: &str, err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LedgerError::DuplicateAccount(account_number.to_string())
        }
        _ => LedgerError::Query(format!("Failed to insert account: {err}")),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::Query(format!("Failed to read column {name}: {e}")))
}

fn row_to_account(row: &PgRow) -> Result<Account, LedgerError> {
    let status: String = column(row, "status")?;
    Ok(Account {
        account_number: column(row, "account_number")?,
        account_holder_name: column(row, "account_holder_name")?,
        available_balance: column(row, "available_balance")?,
        branch_code: column(row, "branch_code")?,
        status: AccountStatus::parse(&status)?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}
