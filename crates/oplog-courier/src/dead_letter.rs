//! Dead-letter sink.
//!
//! Terminal consumer of the dead-letter queue. Every delivery is acked
//! whether or not it could be recorded; a recording failure is logged and
//! the entry is not requeued.

use crate::error::CourierResult;
use chrono::{DateTime, Utc};
use oplog_broker::{Broker, Delivery};
use oplog_envelope::{
    decode_dead_letter, CorrelationId, DeadLetterRecord, DeadLetterSource, HEADER_ERROR_REASON,
    HEADER_FAILED_TIME, HEADER_MESSAGE_ID, HEADER_RETRY_COUNT, HEADER_TIMESTAMP,
};
use oplog_outbox::Clock;
use oplog_store::DeadLetterStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Reason recorded when a dead-letter envelope carries none.
pub const UNKNOWN_REASON: &str = "unknown";

/// Durably records dead-lettered envelopes.
pub struct DeadLetterSink {
    broker: Arc<dyn Broker>,
    store: Arc<dyn DeadLetterStore>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterSink {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn DeadLetterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            store,
            clock,
        }
    }

    /// Record one dead-letter delivery and ack it unconditionally.
    ///
    /// Returns the stored row id, or `None` if recording failed.
    pub async fn handle(&self, delivery: &Delivery) -> Option<i64> {
        let reason = delivery.header(HEADER_ERROR_REASON);
        let recorded = match self.record(&delivery.body, reason, &delivery.headers).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    delivery_tag = %delivery.delivery_tag,
                    reason = reason.unwrap_or(UNKNOWN_REASON),
                    payload = %delivery.body_text(),
                    error = %e,
                    "Failed to record dead letter"
                );
                None
            }
        };

        if let Err(e) = self.broker.ack(delivery).await {
            error!(
                delivery_tag = %delivery.delivery_tag,
                error = %e,
                "Failed to ack dead letter"
            );
        }

        recorded
    }

    /// Store `payload` with its failure reason and timing metadata.
    ///
    /// A payload that is already a [`DeadLetterRecord`] is stored as is.
    /// Anything else is wrapped, taking reason, retry count and times from
    /// `reason` and `headers`.
    pub async fn record(
        &self,
        payload: &[u8],
        reason: Option<&str>,
        headers: &[(String, String)],
    ) -> CourierResult<i64> {
        let record = match decode_dead_letter(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Dead letter is not a dead-letter record, wrapping raw payload");
                self.wrap_raw(payload, reason, headers)
            }
        };

        let id = self.store.append(&record).await?;

        info!(
            dead_letter_id = id,
            correlation_id = ?record.correlation_id,
            reason = %record.failure_reason,
            retry_count = record.retry_count,
            source = %record.source,
            "Dead letter recorded"
        );

        Ok(id)
    }

    fn wrap_raw(
        &self,
        payload: &[u8],
        reason: Option<&str>,
        headers: &[(String, String)],
    ) -> DeadLetterRecord {
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        DeadLetterRecord {
            correlation_id: header(HEADER_MESSAGE_ID).map(CorrelationId::from_string),
            payload: String::from_utf8_lossy(payload).into_owned(),
            failure_reason: reason.unwrap_or(UNKNOWN_REASON).to_string(),
            retry_count: header(HEADER_RETRY_COUNT)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            original_send_time: header(HEADER_TIMESTAMP).and_then(parse_time),
            dead_letter_time: header(HEADER_FAILED_TIME)
                .and_then(parse_time)
                .unwrap_or_else(|| self.clock.now()),
            source: DeadLetterSource::Consumer,
        }
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
