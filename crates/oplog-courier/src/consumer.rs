//! Operation-log consumer.
//!
//! Each delivery moves `Received -> Processing -> {Persisted, Retried,
//! DeadLettered}` and is acked exactly once at the end, whatever the
//! outcome. Failed persists are retried by republishing a copy with a
//! bumped retry counter; the original delivery is then acked.

use crate::config::ConsumerConfig;
use crate::error::{CourierError, CourierResult};
use oplog_broker::{Broker, Delivery, Route};
use oplog_envelope::{
    decode_event, encode_event, CorrelationId, DeadLetterRecord, DeadLetterSource, Envelope,
    OperationEvent, HEADER_MESSAGE_ID, HEADER_TIMESTAMP, REASON_DESERIALIZATION_FAILED,
};
use oplog_outbox::Clock;
use oplog_store::OperationLogStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Terminal state of one handled delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Persisted,
    /// Republished to the main queue carrying `retry_count`.
    Retried { retry_count: u32 },
    DeadLettered { reason: String },
}

/// Consumes the main queue and persists operation events.
pub struct OperationLogConsumer {
    broker: Arc<dyn Broker>,
    store: Arc<dyn OperationLogStore>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
}

impl OperationLogConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn OperationLogStore>,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            store,
            clock,
            config,
        }
    }

    /// Handle one delivery and ack it.
    pub async fn handle(&self, delivery: &Delivery) -> Outcome {
        let outcome = self.process(delivery).await;

        if let Err(e) = self.broker.ack(delivery).await {
            error!(
                delivery_tag = %delivery.delivery_tag,
                error = %e,
                "Failed to ack delivery"
            );
        }

        outcome
    }

    async fn process(&self, delivery: &Delivery) -> Outcome {
        let (envelope, event) = match decode(delivery) {
            Ok(decoded) => decoded,
            Err(e) => {
                let reason = format!("{REASON_DESERIALIZATION_FAILED}: {e}");
                warn!(
                    delivery_tag = %delivery.delivery_tag,
                    message_id = delivery.header(HEADER_MESSAGE_ID).unwrap_or("-"),
                    error = %e,
                    "Malformed operation log delivery"
                );
                self.dead_letter(delivery, reason.clone(), 0).await;
                return Outcome::DeadLettered { reason };
            }
        };

        let retry_count = envelope.retry_count();
        let message_id = envelope.message_id().cloned();

        debug!(
            message_id = ?message_id,
            retry_count,
            action = %event.action,
            "Processing operation log"
        );

        let save_error = match self.store.save(&event).await {
            Ok(log) => {
                info!(
                    message_id = ?message_id,
                    log_id = %log.log_id,
                    user_id = log.user_id,
                    action = %log.action,
                    "Operation log persisted"
                );
                return Outcome::Persisted;
            }
            Err(e) => e,
        };

        if retry_count >= self.config.max_retries {
            error!(
                message_id = ?message_id,
                retry_count,
                error = %save_error,
                "Operation log failed after max retries"
            );
            let reason = save_error.to_string();
            self.dead_letter(delivery, reason.clone(), retry_count).await;
            return Outcome::DeadLettered { reason };
        }

        let next = retry_count + 1;
        warn!(
            message_id = ?message_id,
            retry_count = next,
            error = %save_error,
            "Failed to persist operation log, republishing"
        );

        match self.republish(message_id, event, next).await {
            Ok(()) => Outcome::Retried { retry_count: next },
            Err(e) => {
                let reason = format!("republish failed: {e}");
                error!(delivery_tag = %delivery.delivery_tag, error = %e, "Republish failed");
                self.dead_letter(delivery, reason.clone(), retry_count).await;
                Outcome::DeadLettered { reason }
            }
        }
    }

    /// Publish a copy of `event` to the main queue with `retry_count` in both
    /// the header and the payload.
    async fn republish(
        &self,
        message_id: Option<CorrelationId>,
        mut event: OperationEvent,
        retry_count: u32,
    ) -> CourierResult<()> {
        event.retry_count = retry_count;
        let id = message_id.unwrap_or_else(CorrelationId::generate);
        let envelope =
            Envelope::from_serialized(&id, encode_event(&event)?, retry_count, self.clock.now());

        let confirmation = self.broker.publish(Route::Main, &envelope).await?;
        match confirmation.cause() {
            None => Ok(()),
            Some(cause) => Err(CourierError::NotConfirmed(cause.to_string())),
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: String, retry_count: u32) {
        let record = DeadLetterRecord {
            correlation_id: delivery
                .header(HEADER_MESSAGE_ID)
                .map(CorrelationId::from_string),
            payload: delivery.body_text(),
            failure_reason: reason,
            retry_count,
            original_send_time: delivery
                .header(HEADER_TIMESTAMP)
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&chrono::Utc)),
            dead_letter_time: self.clock.now(),
            source: DeadLetterSource::Consumer,
        };

        if let Err(e) = self.publish_dead_letter(&record).await {
            error!(
                correlation_id = ?record.correlation_id,
                reason = %record.failure_reason,
                payload = %record.payload,
                error = %e,
                "Failed to forward operation log to dead-letter queue"
            );
            return;
        }

        info!(
            correlation_id = ?record.correlation_id,
            reason = %record.failure_reason,
            retry_count,
            "Operation log forwarded to dead-letter queue"
        );
    }

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> CourierResult<()> {
        let envelope = Envelope::for_dead_letter(record)?;
        let confirmation = self.broker.publish(Route::DeadLetter, &envelope).await?;
        match confirmation.cause() {
            None => Ok(()),
            Some(cause) => Err(CourierError::NotConfirmed(cause.to_string())),
        }
    }
}

/// Headers and payload together; either failing is a malformed delivery.
fn decode(delivery: &Delivery) -> CourierResult<(Envelope, OperationEvent)> {
    let envelope = delivery.envelope()?;
    let event = decode_event(&envelope.body)?;
    Ok((envelope, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oplog_broker::{InMemoryBroker, ScriptedConfirm};
    use oplog_envelope::HEADER_RETRY_COUNT;
    use oplog_outbox::ManualClock;
    use oplog_store::MemoryStore;

    fn consumer(broker: &Arc<InMemoryBroker>, store: &Arc<MemoryStore>) -> OperationLogConsumer {
        OperationLogConsumer::new(
            broker.clone(),
            store.clone(),
            Arc::new(ManualClock::default()),
            ConsumerConfig::default(),
        )
    }

    fn inject_event(broker: &InMemoryBroker, retry_count: u32) {
        let mut event = OperationEvent::user_login(7, "alice", "10.0.0.1");
        event.retry_count = retry_count;
        let envelope = Envelope::from_serialized(
            &CorrelationId::from_string("corr-7"),
            encode_event(&event).unwrap(),
            retry_count,
            chrono::Utc::now(),
        );
        let headers = envelope
            .headers
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        broker.inject(Route::Main, headers, envelope.body);
    }

    #[tokio::test]
    async fn test_republish_bumps_header_and_payload() {
        let broker = Arc::new(InMemoryBroker::default());
        let store = Arc::new(MemoryStore::new());
        store.fail_next_saves(1, "disk full");

        inject_event(&broker, 1);
        let delivery = broker.receive(Route::Main).await.unwrap().unwrap();
        let outcome = consumer(&broker, &store).handle(&delivery).await;

        assert_eq!(outcome, Outcome::Retried { retry_count: 2 });

        let attempts = broker.attempts(Route::Main);
        assert_eq!(attempts.len(), 1);
        let republished = &attempts[0].envelope;
        assert_eq!(republished.retry_count(), 2);
        assert_eq!(republished.message_id().map(|id| id.as_str()), Some("corr-7"));
        assert_eq!(decode_event(&republished.body).unwrap().retry_count, 2);
        assert_eq!(broker.acked(), vec![delivery.delivery_tag.clone()]);
    }

    #[tokio::test]
    async fn test_invalid_retry_header_is_malformed() {
        let broker = Arc::new(InMemoryBroker::default());
        let store = Arc::new(MemoryStore::new());
        let body = encode_event(&OperationEvent::user_logout(1, "bob", "::1")).unwrap();
        broker.inject(
            Route::Main,
            vec![(HEADER_RETRY_COUNT.to_string(), "many".to_string())],
            body,
        );

        let delivery = broker.receive(Route::Main).await.unwrap().unwrap();
        let outcome = consumer(&broker, &store).handle(&delivery).await;

        assert!(matches!(
            outcome,
            Outcome::DeadLettered { ref reason } if reason.starts_with("deserialization failed")
        ));
        assert_eq!(store.save_attempts(), 0);
        assert!(broker.attempts(Route::Main).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_republish_is_dead_lettered() {
        let broker = Arc::new(InMemoryBroker::default());
        let store = Arc::new(MemoryStore::new());
        store.fail_next_saves(1, "locked");
        broker.script(Route::Main, [ScriptedConfirm::Nack("queue full".to_string())]);

        inject_event(&broker, 0);
        let delivery = broker.receive(Route::Main).await.unwrap().unwrap();
        let outcome = consumer(&broker, &store).handle(&delivery).await;

        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: "republish failed: Publish not confirmed: queue full".to_string()
            }
        );
        assert_eq!(broker.attempts(Route::DeadLetter).len(), 1);
        assert_eq!(broker.unacked_count(), 0);
    }
}
