//! Property tests: balances equal the sum of accepted mutations and never go
//! negative, whatever sequence of deposits and withdrawals arrives.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use banking_ledger_core::Decimal;
use banking_ledger_core::account::Account;
use banking_ledger_core::audit::AuditStatus;
use banking_ledger_core::environment::Clock;
use banking_ledger_core::message::TransactionType;
use banking_ledger_runtime::{AuditIndexer, TransactionProcessor};
use banking_ledger_testing::fixtures::intent;
use banking_ledger_testing::{InMemoryAuditIndex, InMemoryLedger, test_clock};
use proptest::prelude::*;
use std::sync::Arc;

const ACCOUNT: &str = "BR10000001";

fn op() -> impl Strategy<Value = (TransactionType, Decimal)> {
    (
        prop_oneof![Just(TransactionType::Deposit), Just(TransactionType::Withdrawal)],
        // Cents, including zero and negatives, which must be rejected.
        -500i64..5_000,
    )
        .prop_map(|(kind, cents)| (kind, Decimal::new(cents, 2)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balance_equals_initial_plus_accepted_mutations(
        initial_cents in 0i64..10_000,
        ops in prop::collection::vec(op(), 0..40),
    ) {
        let initial = Decimal::new(initial_cents, 2);
        let ledger = InMemoryLedger::new();
        ledger.insert(Account::open(
            ACCOUNT.to_string(),
            "Property".to_string(),
            initial,
            "BR1".to_string(),
            test_clock().now(),
        ));
        let audit = InMemoryAuditIndex::new();
        let processor = TransactionProcessor::new(
            Arc::new(ledger.clone()),
            AuditIndexer::new(Arc::new(audit.clone()), Arc::new(test_clock())),
        );

        let mut expected = initial;
        tokio_test::block_on(async {
            for (n, (kind, amount)) in ops.iter().enumerate() {
                let result = processor
                    .process(&intent(ACCOUNT, *kind, *amount, &format!("p-{n}")))
                    .await;

                let accepted = *amount > Decimal::ZERO
                    && (*kind == TransactionType::Deposit || expected >= *amount);
                prop_assert_eq!(result.is_ok(), accepted);
                if accepted {
                    expected = match kind {
                        TransactionType::Deposit => expected + *amount,
                        TransactionType::Withdrawal => expected - *amount,
                    };
                }

                let balance = ledger.balance(ACCOUNT).unwrap();
                prop_assert_eq!(balance, expected);
                prop_assert!(balance >= Decimal::ZERO);
            }
            Ok(())
        })?;

        // One audit record per attempt.
        prop_assert_eq!(audit.len(), ops.len());
        let completed = audit.records().iter().filter(|r| r.status == AuditStatus::Completed).count();
        prop_assert!(completed <= ops.len());
    }
}
