//! Dead-letter sink recording.

use super::harness::CourierHarness;
use oplog_broker::Route;
use oplog_envelope::{
    CorrelationId, DeadLetterRecord, DeadLetterSource, Envelope, OperationEvent,
    HEADER_ERROR_REASON, REASON_MAX_RETRIES_EXCEEDED,
};
use oplog_outbox::Clock;

#[tokio::test]
async fn consumer_dead_letters_reach_the_store() {
    let h = CourierHarness::new();
    h.store.fail_all_saves("constraint violation");
    h.inject_event(&OperationEvent::user_login(8, "frank", "::1"), 3);

    h.handle_all().await;
    let recorded = h.sink_all().await;

    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].is_some());
    let stored = h.store.dead_letters();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].retry_count, 3);
    assert_eq!(stored[0].source, DeadLetterSource::Consumer);
    assert!(stored[0].failure_reason.contains("constraint violation"));
    assert_eq!(h.broker.unacked_count(), 0);
}

#[tokio::test]
async fn producer_record_is_stored_unchanged() {
    let h = CourierHarness::new();
    let record = DeadLetterRecord {
        correlation_id: Some(CorrelationId::from_string("corr-p")),
        payload: "{\"userId\":1}".to_string(),
        failure_reason: REASON_MAX_RETRIES_EXCEEDED.to_string(),
        retry_count: 3,
        original_send_time: Some(h.clock.now()),
        dead_letter_time: h.clock.now(),
        source: DeadLetterSource::Producer,
    };
    h.inject_envelope(Route::DeadLetter, &Envelope::for_dead_letter(&record).unwrap());

    h.sink_all().await;

    assert_eq!(h.store.dead_letters(), vec![record]);
}

#[tokio::test]
async fn recording_failure_still_acks() {
    let h = CourierHarness::new();
    h.store.fail_appends("disk full");
    h.broker.inject(
        Route::DeadLetter,
        vec![(HEADER_ERROR_REASON.to_string(), "deserialization failed".to_string())],
        b"raw".to_vec(),
    );

    let recorded = h.sink_all().await;

    assert_eq!(recorded, vec![None]);
    assert!(h.store.dead_letters().is_empty());
    assert_eq!(h.broker.acked().len(), 1);
    assert_eq!(h.broker.unacked_count(), 0);
    // never requeued
    assert!(h.broker.queued(Route::DeadLetter).is_empty());
    assert!(h.broker.attempts(Route::DeadLetter).is_empty());
}
