//! Accounts held in the ledger store.
//!
//! An [`Account`] is created only by the account processor and its balance is
//! mutated only by the transaction processor. Accounts are never deleted.

use crate::ledger::LedgerError;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of digits appended to the branch code to form an account number.
pub const ACCOUNT_SUFFIX_DIGITS: usize = 7;

/// Exclusive upper bound of the numeric account-number suffix.
const SUFFIX_MODULUS: i64 = 10_000_000;

/// Decimal places a ledger balance carries (`NUMERIC(20, 2)`).
pub const BALANCE_SCALE: u32 = 2;

/// Largest balance the ledger column can hold.
#[must_use]
pub fn max_balance() -> Decimal {
    Decimal::from_i128_with_scale(99_999_999_999_999_999_999, BALANCE_SCALE)
}

/// Whether `amount` can be stored without rounding: at most
/// [`BALANCE_SCALE`] significant decimal places and no larger than
/// [`max_balance`].
#[must_use]
pub fn is_ledger_amount(amount: Decimal) -> bool {
    amount.normalize().scale() <= BALANCE_SCALE && amount.abs() <= max_balance()
}

/// Lifecycle status of an account.
///
/// Only [`AccountStatus::Active`] accounts accept deposits and withdrawals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Open for transactions
    Active,
    /// Closed by an administrative flow
    Deactivated,
    /// Temporarily blocked by an administrative flow
    Frozen,
}

impl AccountStatus {
    /// Convert status to its database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deactivated => "DEACTIVATED",
            Self::Frozen => "FROZEN",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Query`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "DEACTIVATED" => Ok(Self::Deactivated),
            "FROZEN" => Ok(Self::Frozen),
            _ => Err(LedgerError::Query(format!("Invalid account status: {s}"))),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger account row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// `<branch><7 digits>`, unique
    pub account_number: String,
    /// Name of the account holder
    pub account_holder_name: String,
    /// Available balance, never negative in a committed state
    pub available_balance: Decimal,
    /// Branch code the account belongs to
    pub branch_code: String,
    /// Lifecycle status
    pub status: AccountStatus,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// When the account row was last modified
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Build a new `ACTIVE` account holding `initial_deposit`.
    #[must_use]
    pub fn open(
        account_number: String,
        account_holder_name: String,
        initial_deposit: Decimal,
        branch_code: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_number,
            account_holder_name,
            available_balance: initial_deposit,
            branch_code,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The part of an account read under a row lock by the transaction processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    /// Balance at the time the lock was acquired
    pub balance: Decimal,
    /// Branch code stored on the account
    pub branch_code: String,
}

/// Generates candidate account numbers of the form `<branch><7 digits>`.
///
/// The first candidate is derived from the current time modulo 10,000,000.
/// Later candidates (after a collision) use a random suffix, so a retry loop
/// does not keep producing the same number within one clock tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountNumberGenerator;

impl AccountNumberGenerator {
    /// Candidate number for the given attempt (0-based).
    #[must_use]
    pub fn candidate(&self, branch_code: &str, attempt: usize, now: DateTime<Utc>) -> String {
        let suffix = if attempt == 0 {
            time_suffix(now)
        } else {
            random_suffix()
        };
        format_account_number(branch_code, suffix)
    }
}

/// Concatenate a branch code and a zero-padded 7-digit suffix.
#[must_use]
pub fn format_account_number(branch_code: &str, suffix: u32) -> String {
    format!("{branch_code}{suffix:0width$}", width = ACCOUNT_SUFFIX_DIGITS)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // rem_euclid keeps it in 0..10^7
fn time_suffix(now: DateTime<Utc>) -> u32 {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().wrapping_mul(1_000));
    nanos.rem_euclid(SUFFIX_MODULUS) as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn random_suffix() -> u32 {
    rand::thread_rng().gen_range(0..SUFFIX_MODULUS) as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_roundtrip() {
        for status in &[
            AccountStatus::Active,
            AccountStatus::Deactivated,
            AccountStatus::Frozen,
        ] {
            let parsed = AccountStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn status_invalid() {
        assert!(AccountStatus::parse("CLOSED").is_err());
    }

    #[test]
    fn account_number_is_branch_plus_seven_digits() {
        let generator = AccountNumberGenerator;
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();

        for attempt in 0..5 {
            let number = generator.candidate("BR1", attempt, now);
            assert_eq!(number.len(), 10, "{number}");
            assert!(number.starts_with("BR1"));
            assert!(number[3..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn first_candidate_is_derived_from_time() {
        let generator = AccountNumberGenerator;
        let now = Utc.timestamp_nanos(1_700_000_000_012_345_678);

        assert_eq!(generator.candidate("001", 0, now), "0012345678");
    }

    #[test]
    fn small_suffixes_are_zero_padded() {
        assert_eq!(format_account_number("XYZ", 42), "XYZ0000042");
    }

    #[test]
    fn ledger_amounts_fit_the_balance_column() {
        assert!(is_ledger_amount(Decimal::new(1_050, 2)));
        assert!(is_ledger_amount(Decimal::new(10_000, 4))); // 1.0000 normalizes to 1
        assert!(is_ledger_amount(max_balance()));

        assert!(!is_ledger_amount(Decimal::new(1, 3)));
        assert!(!is_ledger_amount(Decimal::new(995, 3)));
        assert!(!is_ledger_amount(max_balance() + Decimal::new(1, 2)));
        assert!(!is_ledger_amount(Decimal::from_i128_with_scale(50_000_000_000_000_000_000_000_000_000, 0)));
    }

    #[test]
    fn open_account_is_active() {
        let now = Utc::now();
        let account = Account::open(
            "BR10000001".to_string(),
            "Ada".to_string(),
            Decimal::new(10_000, 2),
            "BR1".to_string(),
            now,
        );
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.available_balance, Decimal::new(10_000, 2));
        assert_eq!(account.created_at, account.updated_at);
    }
}
