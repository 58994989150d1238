//! Integration tests for [`RedpandaMessageSource`] against a real Kafka broker.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they require
//! Docker (for testcontainers) and take a while to start the broker.
//!
//! ```bash
//! cargo test -p banking-ledger-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use banking_ledger_core::message::{QueueKind, TransactionType};
use banking_ledger_core::source::MessageSource;
use banking_ledger_redpanda::{RedpandaMessageSource, RedpandaPublisher};
use banking_ledger_testing::fixtures::{account_request, intent};
use rust_decimal::Decimal;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Start a broker and wait until it accepts a publish on both request topics.
async fn start_broker() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let publisher = RedpandaPublisher::new(&brokers).expect("Failed to create publisher");
    for queue in [QueueKind::AccountCreation, QueueKind::Transaction] {
        let mut ready = false;
        for _ in 0..60 {
            if publisher.publish(queue, "warmup", b"warmup").await.is_ok() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(ready, "Kafka failed to accept messages on {queue}");
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    (kafka, brokers)
}

fn source(brokers: &str, group: &str) -> RedpandaMessageSource {
    RedpandaMessageSource::builder()
        .brokers(brokers)
        .group_id(group)
        .topic("account_creator", QueueKind::AccountCreation)
        .topic("transaction_processor", QueueKind::Transaction)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create message source")
}

/// Receive deliveries until one is not a warmup record.
async fn next_request(source: &RedpandaMessageSource) -> banking_ledger_core::source::Delivery {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let delivery = source.receive().await.expect("source should be open");
            if delivery.payload() == b"warmup" {
                delivery.ack().await.expect("ack warmup");
                continue;
            }
            return delivery;
        }
    })
    .await
    .expect("Timeout waiting for a request")
}

#[tokio::test]
#[ignore]
async fn test_records_are_tagged_with_their_queue() {
    let (_kafka, brokers) = start_broker().await;
    let publisher = RedpandaPublisher::new(&brokers).expect("publisher");

    publisher
        .publish_json(
            QueueKind::AccountCreation,
            "ref-1",
            &account_request("ref-1", Decimal::new(100, 0)),
        )
        .await
        .expect("publish account request");
    publisher
        .publish_json(
            QueueKind::Transaction,
            "tx-1",
            &intent("BR10000001", TransactionType::Deposit, Decimal::new(5, 0), "tx-1"),
        )
        .await
        .expect("publish transaction");

    let source = source(&brokers, "tagging-test");
    let mut queues = Vec::new();
    for _ in 0..2 {
        let delivery = next_request(&source).await;
        queues.push(delivery.queue());
        delivery.ack().await.expect("ack");
    }
    queues.sort_by_key(QueueKind::as_str);

    assert_eq!(queues, vec![QueueKind::AccountCreation, QueueKind::Transaction]);
}

#[tokio::test]
#[ignore]
async fn test_unacknowledged_record_is_redelivered() {
    let (_kafka, brokers) = start_broker().await;
    let publisher = RedpandaPublisher::new(&brokers).expect("publisher");
    publisher
        .publish(QueueKind::Transaction, "tx-2", br#"{"redeliver": true}"#)
        .await
        .expect("publish");

    {
        let first = source(&brokers, "redelivery-test");
        let delivery = next_request(&first).await;
        assert_eq!(delivery.payload(), br#"{"redeliver": true}"#);
        // Dropped without acknowledgement
        first.close();
    }

    let second = source(&brokers, "redelivery-test");
    let delivery = next_request(&second).await;
    assert_eq!(delivery.payload(), br#"{"redeliver": true}"#);
    delivery.ack().await.expect("ack");
}

#[tokio::test]
#[ignore]
async fn test_close_ends_receive() {
    let (_kafka, brokers) = start_broker().await;
    let source = std::sync::Arc::new(source(&brokers, "close-test"));

    let waiting = {
        let source = std::sync::Arc::clone(&source);
        tokio::spawn(async move {
            // Drain warmups, then block until closed
            while let Some(delivery) = source.receive().await {
                delivery.ack().await.expect("ack");
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    source.close();

    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("receive should return None after close")
        .expect("task should not panic");
    assert!(source.receive().await.is_none());
}
