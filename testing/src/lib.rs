//! # Banking Ledger Testing
//!
//! In-memory collaborators for fast, deterministic tests of the ledger pipeline.
//!
//! This crate provides:
//! - [`InMemoryLedger`]: ledger store with real per-account row locks and
//!   rollback-on-drop transactions
//! - [`InMemoryAuditIndex`]: audit index with failure injection
//! - [`InMemoryQueue`]: closable message source that records acknowledgements
//! - [`InMemoryDeadLetters`]: dead-letter sink
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use banking_ledger_testing::{InMemoryLedger, test_clock};
//! use banking_ledger_core::environment::Clock;
//!
//! let ledger = InMemoryLedger::new();
//! assert!(ledger.is_empty());
//! assert_eq!(test_clock().now(), test_clock().now());
//! ```

mod audit;
mod dead_letters;
mod ledger;
mod queue;

pub use audit::InMemoryAuditIndex;
pub use dead_letters::InMemoryDeadLetters;
pub use ledger::InMemoryLedger;
pub use queue::InMemoryQueue;

use banking_ledger_core::environment::Clock;
use chrono::{DateTime, Utc};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use banking_ledger_testing::mocks::FixedClock;
    /// use banking_ledger_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test data builders.
pub mod fixtures {
    use banking_ledger_core::message::{AccountRequest, TransactionIntent, TransactionType};
    use rust_decimal::Decimal;

    /// An account-creation request for branch `BR1`.
    #[must_use]
    pub fn account_request(reference_id: &str, initial_deposit: Decimal) -> AccountRequest {
        AccountRequest {
            account_holder_name: "Ada Lovelace".to_string(),
            initial_deposit,
            branch_code: "BR1".to_string(),
            reference_id: reference_id.to_string(),
        }
    }

    /// A deposit or withdrawal against `account_number`.
    #[must_use]
    pub fn intent(
        account_number: &str,
        kind: TransactionType,
        amount: Decimal,
        transaction_id: &str,
    ) -> TransactionIntent {
        TransactionIntent {
            account_number: account_number.to_string(),
            amount,
            transaction_type: kind.as_str().to_string(),
            transaction_id: transaction_id.to_string(),
            branch_code: None,
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
