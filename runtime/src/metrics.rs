//! Prometheus metrics for the ledger pipeline.
//!
//! Counters and histograms are recorded through the `metrics` facade and are
//! no-ops until a recorder is installed. The worker binary installs the
//! Prometheus exporter when a listen address is configured.
//!
//! # Example
//!
//! ```rust,no_run
//! use banking_ledger_runtime::metrics::install_exporter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Metrics available at http://localhost:9090/metrics
//! install_exporter("0.0.0.0:9090".parse()?)?;
//! # Ok(())
//! # }
//! ```

use banking_ledger_core::message::QueueKind;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime, at most once per process.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!(%addr, "Metrics exporter listening on http://{addr}/metrics");
    Ok(())
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!("ledger.messages.received", "Messages received from the queue");
    describe_counter!("ledger.messages.malformed", "Messages that could not be decoded");
    describe_counter!("ledger.messages.acked", "Messages acknowledged");
    describe_counter!("ledger.accounts.created", "Accounts created");
    describe_counter!("ledger.accounts.failed", "Account creation requests that failed");
    describe_counter!("ledger.transactions.completed", "Deposits and withdrawals committed");
    describe_counter!("ledger.transactions.failed", "Deposits and withdrawals that failed");
    describe_counter!("ledger.audit.indexed", "Audit records written");
    describe_counter!("ledger.audit.failed", "Audit records that could not be written");
    describe_counter!("ledger.dead_letters.added", "Messages routed to the dead-letter sink");
    describe_histogram!(
        "ledger.transaction.duration_seconds",
        "Time from BEGIN to COMMIT or rollback of a transaction"
    );
}

/// Dispatcher metrics recorder.
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a received message.
    pub fn record_received(queue: QueueKind) {
        counter!("ledger.messages.received", "queue" => queue.as_str()).increment(1);
    }

    /// Record a payload that failed to decode.
    pub fn record_malformed(queue: QueueKind) {
        counter!("ledger.messages.malformed", "queue" => queue.as_str()).increment(1);
    }

    /// Record an acknowledgement.
    pub fn record_acked(queue: QueueKind) {
        counter!("ledger.messages.acked", "queue" => queue.as_str()).increment(1);
    }

    /// Record a dead-lettered message.
    pub fn record_dead_letter(queue: QueueKind) {
        counter!("ledger.dead_letters.added", "queue" => queue.as_str()).increment(1);
    }
}

/// Processor metrics recorder.
pub struct ProcessorMetrics;

impl ProcessorMetrics {
    /// Record an account creation outcome.
    pub fn record_account(created: bool) {
        if created {
            counter!("ledger.accounts.created").increment(1);
        } else {
            counter!("ledger.accounts.failed").increment(1);
        }
    }

    /// Record a transaction outcome and its duration.
    pub fn record_transaction(completed: bool, duration: Duration) {
        if completed {
            counter!("ledger.transactions.completed").increment(1);
        } else {
            counter!("ledger.transactions.failed").increment(1);
        }
        histogram!("ledger.transaction.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an audit write outcome.
    pub fn record_audit(indexed: bool) {
        if indexed {
            counter!("ledger.audit.indexed").increment(1);
        } else {
            counter!("ledger.audit.failed").increment(1);
        }
    }
}
