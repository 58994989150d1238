//! Inbound message payloads.
//!
//! Each queue carries exactly one kind of message, so a payload is decoded
//! according to the [`QueueKind`] it was received on. Field names follow the
//! JSON produced by the request-publishing layer (`camelCase`, `referenceID`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The logical queue a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Account-creation requests
    AccountCreation,
    /// Deposit and withdrawal requests
    Transaction,
}

impl QueueKind {
    /// Name of the queue as published by the request layer.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccountCreation => "account_creator",
            Self::Transaction => "transaction_processor",
        }
    }

    /// Parse a queue name, `None` if unknown.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account_creator" => Some(Self::AccountCreation),
            "transaction_processor" => Some(Self::Transaction),
            _ => None,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to open a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    /// Name of the account holder
    pub account_holder_name: String,
    /// Opening balance, must not be negative
    pub initial_deposit: Decimal,
    /// Branch code, used as the account-number prefix
    pub branch_code: String,
    /// Correlation id assigned by the request layer
    #[serde(rename = "referenceID")]
    pub reference_id: String,
}

/// Supported balance mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Credit the account
    Deposit,
    /// Debit the account, requires sufficient funds
    Withdrawal,
}

impl TransactionType {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
        }
    }

    /// Parse the wire representation, `None` for anything unknown.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(Self::Deposit),
            "WITHDRAWAL" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to deposit into or withdraw from an existing account.
///
/// The type is kept as the raw string so that an unknown type still decodes
/// and is rejected (and audited) by the transaction processor instead of being
/// dropped as a malformed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    /// Target account
    pub account_number: String,
    /// Amount to move, must be positive
    pub amount: Decimal,
    /// `DEPOSIT` or `WITHDRAWAL`
    #[serde(rename = "type")]
    pub transaction_type: String,
    /// Correlation id assigned by the request layer
    pub transaction_id: String,
    /// Branch code, if the producer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_code: Option<String>,
}

impl TransactionIntent {
    /// The parsed transaction type, `None` if unknown.
    #[must_use]
    pub fn kind(&self) -> Option<TransactionType> {
        TransactionType::parse(&self.transaction_type)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// From the account-creation queue
    CreateAccount(AccountRequest),
    /// From the transaction queue
    Transaction(TransactionIntent),
}

/// A payload that could not be decoded. The message is unrecoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed message on queue '{queue}': {reason}")]
pub struct DecodeError {
    /// Queue the payload arrived on
    pub queue: QueueKind,
    /// Why decoding failed
    pub reason: String,
}

impl InboundMessage {
    /// Decode a raw payload according to the queue it was received on.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is not valid JSON for that queue.
    pub fn decode(queue: QueueKind, payload: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |e: serde_json::Error| DecodeError {
            queue,
            reason: e.to_string(),
        };

        match queue {
            QueueKind::AccountCreation => serde_json::from_slice(payload)
                .map(Self::CreateAccount)
                .map_err(malformed),
            QueueKind::Transaction => serde_json::from_slice(payload)
                .map(Self::Transaction)
                .map_err(malformed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_account_request() {
        let payload = br#"{
            "accountHolderName": "Grace Hopper",
            "initialDeposit": 1000.50,
            "branchCode": "BR1",
            "referenceID": "ref-1"
        }"#;

        let message = InboundMessage::decode(QueueKind::AccountCreation, payload)
            .expect("valid account request");

        assert_eq!(
            message,
            InboundMessage::CreateAccount(AccountRequest {
                account_holder_name: "Grace Hopper".to_string(),
                initial_deposit: Decimal::new(100_050, 2),
                branch_code: "BR1".to_string(),
                reference_id: "ref-1".to_string(),
            })
        );
    }

    #[test]
    fn decodes_transaction_with_unknown_type() {
        let payload = br#"{
            "accountNumber": "BR10000001",
            "amount": 25,
            "type": "TRANSFER",
            "transactionId": "tx-9"
        }"#;

        let InboundMessage::Transaction(intent) =
            InboundMessage::decode(QueueKind::Transaction, payload).expect("decodes")
        else {
            unreachable!("transaction queue yields transactions");
        };

        assert_eq!(intent.transaction_type, "TRANSFER");
        assert_eq!(intent.kind(), None);
        assert_eq!(intent.branch_code, None);
        assert_eq!(intent.amount, Decimal::new(25, 0));
    }

    #[test]
    fn payload_for_the_wrong_queue_is_malformed() {
        let payload = br#"{"accountNumber": "BR10000001", "amount": 1, "type": "DEPOSIT", "transactionId": "t"}"#;

        let err = InboundMessage::decode(QueueKind::AccountCreation, payload).unwrap_err();
        assert_eq!(err.queue, QueueKind::AccountCreation);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = InboundMessage::decode(QueueKind::Transaction, b"not json").unwrap_err();
        assert!(err.to_string().starts_with("Malformed message on queue 'transaction_processor'"));
    }

    #[test]
    fn transaction_type_parse() {
        assert_eq!(TransactionType::parse("DEPOSIT"), Some(TransactionType::Deposit));
        assert_eq!(TransactionType::parse("WITHDRAWAL"), Some(TransactionType::Withdrawal));
        assert_eq!(TransactionType::parse("deposit"), None);
    }
}
