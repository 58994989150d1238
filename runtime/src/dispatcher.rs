//! Decodes one delivery, routes it to its processor and acknowledges it.

use crate::account::AccountProcessor;
use crate::error::ProcessError;
use crate::indexer::AuditIndexer;
use crate::metrics::MessageMetrics;
use crate::transaction::TransactionProcessor;
use banking_ledger_core::environment::Clock;
use banking_ledger_core::ledger::LedgerStore;
use banking_ledger_core::message::InboundMessage;
use banking_ledger_core::source::{DeadLetter, DeadLetterSink, Delivery};
use std::sync::Arc;

/// How a delivery was handled. Every disposition ends in an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The processor succeeded
    Processed,
    /// The processor rejected the message on business rules
    Rejected,
    /// The processor hit an infrastructure failure
    Failed,
    /// The payload could not be decoded
    Malformed,
}

/// Routes decoded messages to the account and transaction processors.
///
/// Malformed payloads and retryable failures are forwarded to the dead-letter
/// sink when one is configured. Business rejections are not: they are final
/// and already visible in the audit trail.
pub struct Dispatcher {
    accounts: AccountProcessor,
    transactions: TransactionProcessor,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Create a dispatcher whose processors share `store` and `indexer`.
    ///
    /// Account-creation failures are not audited and there is no dead-letter
    /// sink until configured.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, indexer: AuditIndexer) -> Self {
        let clock = Arc::clone(indexer.clock());
        Self {
            accounts: AccountProcessor::new(Arc::clone(&store), indexer.clone()),
            transactions: TransactionProcessor::new(store, indexer),
            dead_letters: None,
            clock,
        }
    }

    /// Write a `FAILED` audit record for rejected account-creation requests.
    #[must_use]
    pub fn with_account_failure_audit(mut self, enabled: bool) -> Self {
        self.accounts = self.accounts.with_failure_audit(enabled);
        self
    }

    /// Forward undeliverable messages to `sink`.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Handle one delivery and acknowledge it exactly once.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let queue = delivery.queue();
        MessageMetrics::record_received(queue);

        let disposition = match InboundMessage::decode(queue, delivery.payload()) {
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "Dropping malformed message");
                MessageMetrics::record_malformed(queue);
                self.dead_letter(&delivery, &e.into()).await;
                Disposition::Malformed
            }
            Ok(message) => match self.process(message).await {
                Ok(()) => Disposition::Processed,
                Err(e) if e.is_retryable() => {
                    tracing::error!(queue = %queue, error = %e, "Processing failed");
                    self.dead_letter(&delivery, &e).await;
                    Disposition::Failed
                }
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Message rejected");
                    Disposition::Rejected
                }
            },
        };

        match delivery.ack().await {
            Ok(()) => MessageMetrics::record_acked(queue),
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "Failed to acknowledge message");
            }
        }

        disposition
    }

    async fn process(&self, message: InboundMessage) -> Result<(), ProcessError> {
        match message {
            InboundMessage::CreateAccount(request) => {
                self.accounts.process(&request).await?;
            }
            InboundMessage::Transaction(intent) => {
                self.transactions.process(&intent).await?;
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &ProcessError) {
        let Some(sink) = &self.dead_letters else {
            return;
        };

        let letter = DeadLetter {
            queue: delivery.queue(),
            payload: delivery.payload().to_vec(),
            error_message: error.to_string(),
            retryable: error.is_retryable(),
            failed_at: self.clock.now(),
        };

        match sink.add(&letter).await {
            Ok(id) => {
                MessageMetrics::record_dead_letter(letter.queue);
                tracing::info!(queue = %letter.queue, dead_letter_id = id, "Message dead-lettered");
            }
            Err(e) => {
                tracing::error!(
                    queue = %letter.queue,
                    error = %e,
                    original_error = %letter.error_message,
                    "Failed to dead-letter message"
                );
            }
        }
    }
}
