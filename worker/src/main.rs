//! Ledger worker process.
//!
//! Consumes account-creation requests and transaction intents from the
//! broker, applies them to the ledger database and mirrors every outcome into
//! the audit index. Runs until Ctrl+C or SIGTERM, then stops taking new
//! messages and waits for in-flight ones to finish.

mod config;

use anyhow::Context;
use banking_ledger_core::audit::AuditIndex;
use banking_ledger_core::environment::SystemClock;
use banking_ledger_core::message::QueueKind;
use banking_ledger_core::source::MessageSource;
use banking_ledger_elasticsearch::ElasticsearchAuditIndex;
use banking_ledger_postgres::{PostgresDeadLetterQueue, PostgresLedgerStore};
use banking_ledger_redpanda::RedpandaMessageSource;
use banking_ledger_runtime::retry::{RetryPolicy, retry_with_backoff};
use banking_ledger_runtime::{AuditIndexer, Dispatcher, WorkerPool, WorkerPoolConfig};
use config::WorkerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ledger worker");

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        db_host = %config.database.host,
        db_name = %config.database.name,
        brokers = %config.broker.brokers,
        elasticsearch = %config.elasticsearch_url,
        workers = config.workers,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        banking_ledger_runtime::metrics::install_exporter(addr)
            .context("Failed to start metrics exporter")?;
    }

    let startup = RetryPolicy::builder()
        .max_retries(10)
        .initial_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(10))
        .build();

    info!("Connecting to ledger database...");
    let database_url = config.database.url();
    let store = retry_with_backoff(&startup, "connect ledger database", || {
        PostgresLedgerStore::connect(&database_url, config.database.max_connections)
    })
    .await
    .context("Unable to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Ledger database ready");

    let audit = ElasticsearchAuditIndex::new(&config.elasticsearch_url);
    match retry_with_backoff(&startup, "ping audit index", || audit.ping()).await {
        Ok(()) => info!("Successfully connected to Elasticsearch"),
        Err(e) => error!(error = %e, "Audit index unreachable, audit records will be lost until it recovers"),
    }

    let source = RedpandaMessageSource::builder()
        .brokers(&config.broker.brokers)
        .group_id(&config.broker.group_id)
        .topic(&config.broker.account_topic, QueueKind::AccountCreation)
        .topic(&config.broker.transaction_topic, QueueKind::Transaction)
        .build()
        .context("Failed to subscribe to request topics")?;
    let source: Arc<dyn MessageSource> = Arc::new(source);

    let dead_letters = PostgresDeadLetterQueue::new(store.pool().clone());
    match dead_letters.count_pending().await {
        Ok(0) => {},
        Ok(pending) => warn!(pending, "Dead letters awaiting investigation"),
        Err(e) => warn!(error = %e, "Failed to count dead letters"),
    }

    let indexer = AuditIndexer::new(Arc::new(audit), Arc::new(SystemClock));
    let dispatcher =
        Dispatcher::new(Arc::new(store), indexer).with_dead_letters(Arc::new(dead_letters));

    let pool_config = WorkerPoolConfig::default()
        .with_workers(config.workers)
        .with_account_failure_audit(config.audit_account_failures);
    let handle = WorkerPool::new(&pool_config, source, dispatcher).spawn();

    shutdown_signal().await;

    let handled = handle.shutdown_and_join().await;
    info!(handled, "Ledger worker stopped");
    Ok(())
}

/// Waits for Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
