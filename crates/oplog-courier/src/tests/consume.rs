//! Main-queue consumption: persist, republish, dead-letter, always ack.

use super::harness::CourierHarness;
use crate::Outcome;
use oplog_broker::Route;
use oplog_envelope::{decode_event, DeadLetterSource, OperationEvent, HEADER_MESSAGE_ID};

#[tokio::test]
async fn persisted_delivery_is_acked() {
    let h = CourierHarness::new();
    h.inject_event(&OperationEvent::user_login(42, "alice", "10.1.2.3"), 0);

    assert_eq!(h.handle_next().await, Outcome::Persisted);

    let logs = h.store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].user_id, 42);
    assert_eq!(logs[0].action, "USER_LOGIN");
    assert_eq!(logs[0].ip, "10.1.2.3");
    assert_eq!(h.broker.acked().len(), 1);
    assert_eq!(h.broker.unacked_count(), 0);
    assert!(h.republishes().is_empty());
    assert!(h.dead_letters().is_empty());
}

#[tokio::test]
async fn malformed_payload_goes_straight_to_dead_letter() {
    let h = CourierHarness::new();
    h.broker.inject(
        Route::Main,
        vec![(HEADER_MESSAGE_ID.to_string(), "corr-bad".to_string())],
        b"{\"userId\": \"not a number\"".to_vec(),
    );

    let outcome = h.handle_next().await;

    assert!(matches!(outcome, Outcome::DeadLettered { .. }));
    let records = h.dead_letters();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.failure_reason.contains("deserialization"));
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.source, DeadLetterSource::Consumer);
    assert_eq!(record.payload, "{\"userId\": \"not a number\"");
    assert_eq!(
        record.correlation_id.as_ref().map(|id| id.as_str()),
        Some("corr-bad")
    );

    assert!(h.republishes().is_empty());
    assert_eq!(h.store.save_attempts(), 0);
    assert_eq!(h.broker.unacked_count(), 0);
}

#[tokio::test]
async fn persistent_failure_is_dead_lettered_after_max_retries() {
    let h = CourierHarness::new();
    h.store.fail_all_saves("db down");
    let event = OperationEvent::user_update(3, "dave", "::1", serde_json::json!({ "ip": "::2" }));
    let id = h.inject_event(&event, 0);

    let outcomes = h.handle_all().await;

    assert_eq!(
        outcomes[..3],
        [
            Outcome::Retried { retry_count: 1 },
            Outcome::Retried { retry_count: 2 },
            Outcome::Retried { retry_count: 3 },
        ]
    );
    assert!(matches!(outcomes[3], Outcome::DeadLettered { .. }));
    assert_eq!(outcomes.len(), 4);
    assert_eq!(h.store.save_attempts(), 4);

    // three republishes, no fourth
    let republishes = h.republishes();
    assert_eq!(republishes.len(), 3);
    for (i, envelope) in republishes.iter().enumerate() {
        let expected = i as u32 + 1;
        assert_eq!(envelope.retry_count(), expected);
        assert_eq!(decode_event(&envelope.body).unwrap().retry_count, expected);
        assert_eq!(envelope.message_id(), Some(&id));
    }

    let records = h.dead_letters();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].retry_count, 3);
    assert_eq!(records[0].correlation_id.as_ref(), Some(&id));
    assert!(records[0].failure_reason.contains("db down"));
    assert_eq!(h.broker.acked().len(), 4);
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let h = CourierHarness::new();
    h.store.fail_next_saves(2, "locked");
    h.inject_event(&OperationEvent::password_reset(5, "erin", "::1"), 0);

    let outcomes = h.handle_all().await;

    assert_eq!(
        outcomes,
        vec![
            Outcome::Retried { retry_count: 1 },
            Outcome::Retried { retry_count: 2 },
            Outcome::Persisted,
        ]
    );
    assert_eq!(h.store.logs().len(), 1);
    assert!(h.dead_letters().is_empty());
}

#[tokio::test]
async fn every_delivery_is_acked_exactly_once() {
    let h = CourierHarness::new();
    h.store.fail_next_saves(1, "busy");
    h.inject_event(&OperationEvent::user_login(1, "a", "::1"), 0);
    h.inject_event(&OperationEvent::user_logout(2, "b", "::1"), 0);
    h.broker.inject(Route::Main, Vec::new(), b"garbage".to_vec());
    h.inject_event(&OperationEvent::user_login(3, "c", "::1"), 3);

    let outcomes = h.handle_all().await;

    // 4 injected + 1 republish
    assert_eq!(outcomes.len(), 5);
    let mut acked = h.broker.acked();
    assert_eq!(acked.len(), 5);
    acked.sort();
    acked.dedup();
    assert_eq!(acked.len(), 5);
    assert_eq!(h.broker.unacked_count(), 0);
}
