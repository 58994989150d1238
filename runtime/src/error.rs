//! Error types for the processors and the dispatcher.
//!
//! Business-rule rejections are terminal: the same message will be rejected
//! again. Infrastructure failures are retryable and are routed to the
//! dead-letter sink by the dispatcher.

use banking_ledger_core::Decimal;
use banking_ledger_core::ledger::LedgerError;
use banking_ledger_core::message::DecodeError;
use thiserror::Error;

/// Errors produced by the account processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// The opening balance was below zero
    #[error("initial deposit cannot be negative: {0}")]
    NegativeInitialDeposit(Decimal),

    /// The opening balance has sub-cent digits or exceeds the ledger's range
    #[error("initial deposit {0} is not a valid ledger amount")]
    InvalidInitialDeposit(Decimal),

    /// The branch code cannot prefix an account number
    #[error("invalid branch code '{0}': expected 1 to 3 alphanumeric characters")]
    InvalidBranchCode(String),

    /// Every generated account number collided with an existing one
    #[error("no free account number for branch {branch_code} after {attempts} attempts")]
    AccountNumberExhausted {
        /// Branch the account was requested for
        branch_code: String,
        /// Candidates tried
        attempts: usize,
    },

    /// The ledger store failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AccountError {
    /// Whether processing the same request again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NegativeInitialDeposit(_) | Self::InvalidInitialDeposit(_) | Self::InvalidBranchCode(_) => false,
            Self::AccountNumberExhausted { .. } => true,
            Self::Ledger(e) => e.is_infrastructure(),
        }
    }
}

/// Errors produced by the transaction processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Deposits and withdrawals must move a positive amount
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// Amounts carry at most two decimal places
    #[error("amount {0} has more than 2 decimal places")]
    InvalidPrecision(Decimal),

    /// The resulting balance would not fit the ledger
    #[error("amount {0} takes the balance out of range")]
    AmountOutOfRange(Decimal),

    /// The withdrawal exceeds the available balance
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Balance read under the row lock
        available: Decimal,
        /// Amount requested
        requested: Decimal,
    },

    /// Neither `DEPOSIT` nor `WITHDRAWAL`
    #[error("invalid transaction type: {0}")]
    InvalidType(String),

    /// No `ACTIVE` account with this number
    #[error("account {0} not found or not active")]
    AccountUnavailable(String),

    /// The ledger store failed
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for TransactionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(number) => Self::AccountUnavailable(number),
            other => Self::Ledger(other),
        }
    }
}

impl TransactionError {
    /// Whether processing the same intent again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_infrastructure(),
            _ => false,
        }
    }
}

/// Why the dispatcher could not complete a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Account creation failed
    #[error("account creation failed: {0}")]
    Account(#[from] AccountError),

    /// A deposit or withdrawal failed
    #[error("transaction failed: {0}")]
    Transaction(#[from] TransactionError),
}

impl ProcessError {
    /// Whether a later retry of the same message may succeed.
    ///
    /// Only infrastructure failures are retryable; malformed payloads and
    /// business-rule rejections are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Decode(_) => false,
            Self::Account(e) => e.is_retryable(),
            Self::Transaction(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banking_ledger_core::message::QueueKind;

    #[test]
    fn insufficient_funds_names_both_amounts() {
        let err = TransactionError::InsufficientFunds {
            available: Decimal::new(10_000, 2),
            requested: Decimal::new(50_000, 2),
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: available 100.00, requested 500.00"
        );
    }

    #[test]
    fn missing_account_is_a_business_rejection() {
        let err = TransactionError::from(LedgerError::AccountNotFound("BR10000001".into()));
        assert_eq!(err, TransactionError::AccountUnavailable("BR10000001".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        let commit = ProcessError::from(TransactionError::from(LedgerError::Commit("lost".into())));
        assert!(commit.is_retryable());

        let begin = ProcessError::from(AccountError::from(LedgerError::Connection("refused".into())));
        assert!(begin.is_retryable());

        let rejected = ProcessError::from(TransactionError::InvalidType("TRANSFER".into()));
        assert!(!rejected.is_retryable());

        let overflow = ProcessError::from(TransactionError::AmountOutOfRange(Decimal::MAX));
        assert!(!overflow.is_retryable());

        let negative = ProcessError::from(AccountError::NegativeInitialDeposit(Decimal::NEGATIVE_ONE));
        assert!(!negative.is_retryable());

        let malformed = ProcessError::from(DecodeError {
            queue: QueueKind::Transaction,
            reason: "expected value".into(),
        });
        assert!(!malformed.is_retryable());
    }
}
