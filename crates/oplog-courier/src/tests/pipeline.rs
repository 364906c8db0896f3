//! Producer and courier loops running together over one broker.

use super::harness::{eventually, CourierHarness, WAIT};
use crate::{ConsumerConfig, Courier};
use oplog_broker::{InMemoryBroker, Route};
use oplog_envelope::{OperationEvent, REASON_DESERIALIZATION_FAILED};
use oplog_outbox::{ManualClock, OperationLogProducer, ProducerConfig};
use oplog_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn published_events_are_persisted() {
    let h = CourierHarness::new();
    let producer = OperationLogProducer::new(
        h.broker.clone(),
        Arc::new(h.clock.clone()),
        ProducerConfig::default(),
    )
    .unwrap();
    h.store.fail_next_saves(1, "warming up");

    let (stop, stopped) = watch::channel(false);
    let courier = h.courier.clone();
    let run = tokio::spawn(async move { courier.run(stopped).await });

    producer.publish(OperationEvent::user_register(1, "alice", "a@example.com", "555", "::1"));
    producer.publish(OperationEvent::user_list_view(2, "ADMIN", 1, 20, 3, "::1"));
    assert!(producer.drain(WAIT).await);

    let store = h.store.clone();
    assert!(eventually(|| store.logs().len() == 2).await);
    assert!(h.store.dead_letters().is_empty());
    assert_eq!(h.republishes().len(), 3);

    stop.send(true).unwrap();
    tokio::time::timeout(WAIT, run)
        .await
        .expect("courier stops on shutdown")
        .unwrap()
        .unwrap();
    producer.shutdown().await;
}

#[tokio::test]
async fn malformed_delivery_ends_in_dead_letter_table() {
    let h = CourierHarness::new();
    let (stop, stopped) = watch::channel(false);
    let courier = h.courier.clone();
    let run = tokio::spawn(async move { courier.run(stopped).await });

    h.broker.inject(Route::Main, Vec::new(), b"<xml/>".to_vec());

    let store = h.store.clone();
    assert!(eventually(|| store.dead_letters().len() == 1).await);
    let record = &h.store.dead_letters()[0];
    assert!(record.failure_reason.starts_with(REASON_DESERIALIZATION_FAILED));
    assert_eq!(record.payload, "<xml/>");
    assert!(h.store.logs().is_empty());

    drop(stop);
    tokio::time::timeout(WAIT, run)
        .await
        .expect("courier stops when the shutdown sender is dropped")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn sqlite_store_receives_logs_and_dead_letters() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("oplog.db")).await.unwrap());
    let broker = Arc::new(InMemoryBroker::new(Duration::from_millis(20)));
    let courier = Arc::new(Courier::new(
        broker.clone(),
        store.clone(),
        store.clone(),
        Arc::new(ManualClock::default()),
        ConsumerConfig::default(),
    ));

    let (stop, stopped) = watch::channel(false);
    let run = tokio::spawn({
        let courier = courier.clone();
        async move { courier.run(stopped).await }
    });

    let producer = OperationLogProducer::new(
        broker.clone(),
        Arc::new(ManualClock::default()),
        ProducerConfig::default(),
    )
    .unwrap();
    producer.publish(OperationEvent::user_info_view(1, "gina", 9, "::1"));
    assert!(producer.drain(WAIT).await);
    broker.inject(Route::Main, Vec::new(), b"truncated {".to_vec());

    let persisted = async {
        loop {
            let logs = store.count_operation_logs().await.unwrap();
            let dead = store.count_dead_letters().await.unwrap();
            if logs == 1 && dead == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    assert!(tokio::time::timeout(WAIT, persisted).await.is_ok());

    let logs = store.recent_operation_logs(10).await.unwrap();
    assert_eq!(logs[0].action, "USER_INFO_VIEW");
    let dead = store.recent_dead_letters(10).await.unwrap();
    assert_eq!(dead[0].record.payload, "truncated {");
    assert_eq!(dead[0].record.retry_count, 0);

    stop.send(true).unwrap();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    producer.shutdown().await;
}
