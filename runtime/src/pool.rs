//! Worker pool: N independent consume loops over one shared source.
//!
//! Each worker processes one message to completion before pulling the next.
//! There is no ordering across workers; per-account consistency comes from
//! the ledger row lock. Shutdown is cooperative: closing the source makes
//! `receive` return `None` once drained, and each worker exits after its
//! current message.

use crate::dispatcher::Dispatcher;
use banking_ledger_core::source::MessageSource;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Workers started when no count is configured.
pub const DEFAULT_WORKERS: usize = 4;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Audit rejected account-creation requests as `FAILED`
    pub audit_account_failures: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            audit_account_failures: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Set the worker count; zero falls back to [`DEFAULT_WORKERS`].
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 { DEFAULT_WORKERS } else { workers };
        self
    }

    /// Enable or disable audit records for rejected account creations.
    #[must_use]
    pub const fn with_account_failure_audit(mut self, enabled: bool) -> Self {
        self.audit_account_failures = enabled;
        self
    }
}

/// A fixed set of workers sharing one [`MessageSource`] and [`Dispatcher`].
pub struct WorkerPool {
    source: Arc<dyn MessageSource>,
    dispatcher: Arc<Dispatcher>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool; `config.audit_account_failures` is applied to `dispatcher`.
    #[must_use]
    pub fn new(config: &WorkerPoolConfig, source: Arc<dyn MessageSource>, dispatcher: Dispatcher) -> Self {
        let workers = if config.workers == 0 { DEFAULT_WORKERS } else { config.workers };
        Self {
            source,
            dispatcher: Arc::new(dispatcher.with_account_failure_audit(config.audit_account_failures)),
            workers,
        }
    }

    /// Number of workers this pool starts.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Run until the source is closed and every worker has drained.
    ///
    /// Returns the number of messages handled.
    pub async fn run(self) -> u64 {
        self.spawn().join().await
    }

    /// Start the workers in the background.
    #[must_use]
    pub fn spawn(self) -> WorkerPoolHandle {
        let mut tasks = JoinSet::new();

        for worker_id in 0..self.workers {
            let source = Arc::clone(&self.source);
            let dispatcher = Arc::clone(&self.dispatcher);
            tasks.spawn(
                worker_loop(source, dispatcher)
                    .instrument(tracing::info_span!("worker", worker_id)),
            );
        }

        tracing::info!(workers = self.workers, "Worker pool started");

        WorkerPoolHandle {
            source: self.source,
            tasks,
        }
    }
}

async fn worker_loop(source: Arc<dyn MessageSource>, dispatcher: Arc<Dispatcher>) -> u64 {
    tracing::debug!("Worker started");
    let mut handled = 0;

    while let Some(delivery) = source.receive().await {
        dispatcher.handle(delivery).await;
        handled += 1;
    }

    tracing::info!(handled, "Worker stopped");
    handled
}

/// Handle to a running [`WorkerPool`].
pub struct WorkerPoolHandle {
    source: Arc<dyn MessageSource>,
    tasks: JoinSet<u64>,
}

impl WorkerPoolHandle {
    /// Close the source. Workers finish their current message and exit.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down worker pool");
        self.source.close();
    }

    /// Wait for every worker to exit, returning the messages handled.
    pub async fn join(mut self) -> u64 {
        let mut total = 0;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(handled) => total += handled,
                Err(e) => tracing::error!(error = %e, "Worker task failed"),
            }
        }
        tracing::info!(handled = total, "Worker pool stopped");
        total
    }

    /// Close the source and wait for the workers to drain.
    pub async fn shutdown_and_join(self) -> u64 {
        self.shutdown();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_falls_back_to_default() {
        let config = WorkerPoolConfig::default().with_workers(0);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(WorkerPoolConfig::default().with_workers(8).workers, 8);
    }
}
