//! Transport envelope: headers plus an opaque body.

use crate::{encode_dead_letter, encode_event, CodecError, CodecResult};
use crate::{DeadLetterRecord, OperationEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header carrying the correlation id.
pub const HEADER_MESSAGE_ID: &str = "messageId";
/// Header carrying the consumer-side retry counter.
pub const HEADER_RETRY_COUNT: &str = "x-retry-count";
/// Header carrying the producer-side confirmation retry counter.
pub const HEADER_PUBLISH_RETRY: &str = "x-publish-retry";
/// Header carrying the publish time.
pub const HEADER_TIMESTAMP: &str = "timestamp";
/// Header carrying the delivery mode.
pub const HEADER_DELIVERY_MODE: &str = "deliveryMode";
/// Header carrying the terminal failure reason (dead-letter only).
pub const HEADER_ERROR_REASON: &str = "error-reason";
/// Header carrying the time the envelope was dead-lettered.
pub const HEADER_FAILED_TIME: &str = "failed-time";

/// AMQP-style persistent delivery mode.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Identifier tying a logical event to every delivery and retry attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    pub message_id: Option<CorrelationId>,
    pub retry_count: Option<u32>,
    pub publish_retry: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
    pub persistent: bool,
    pub error_reason: Option<String>,
    pub failed_time: Option<DateTime<Utc>>,
}

impl Headers {
    /// Flatten into `(name, value)` pairs, omitting absent headers.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::with_capacity(7);
        if let Some(id) = &self.message_id {
            fields.push((HEADER_MESSAGE_ID, id.to_string()));
        }
        if let Some(count) = self.retry_count {
            fields.push((HEADER_RETRY_COUNT, count.to_string()));
        }
        if let Some(attempt) = self.publish_retry {
            fields.push((HEADER_PUBLISH_RETRY, attempt.to_string()));
        }
        if let Some(ts) = self.timestamp {
            fields.push((HEADER_TIMESTAMP, ts.to_rfc3339()));
        }
        if self.persistent {
            fields.push((HEADER_DELIVERY_MODE, DELIVERY_MODE_PERSISTENT.to_string()));
        }
        if let Some(reason) = &self.error_reason {
            fields.push((HEADER_ERROR_REASON, reason.clone()));
        }
        if let Some(ts) = self.failed_time {
            fields.push((HEADER_FAILED_TIME, ts.to_rfc3339()));
        }
        fields
    }

    /// Rebuild headers from `(name, value)` pairs. Unknown names are ignored.
    pub fn from_fields<'a, I>(fields: I) -> CodecResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Headers::default();
        for (name, value) in fields {
            match name {
                HEADER_MESSAGE_ID => headers.message_id = Some(CorrelationId::from_string(value)),
                HEADER_RETRY_COUNT => {
                    headers.retry_count = Some(value.parse().map_err(|_| {
                        CodecError::InvalidHeader {
                            name: HEADER_RETRY_COUNT,
                            value: value.to_string(),
                        }
                    })?)
                }
                HEADER_PUBLISH_RETRY => {
                    headers.publish_retry = Some(value.parse().map_err(|_| {
                        CodecError::InvalidHeader {
                            name: HEADER_PUBLISH_RETRY,
                            value: value.to_string(),
                        }
                    })?)
                }
                HEADER_TIMESTAMP => headers.timestamp = Some(parse_time(HEADER_TIMESTAMP, value)?),
                HEADER_DELIVERY_MODE => {
                    headers.persistent = value == DELIVERY_MODE_PERSISTENT.to_string()
                }
                HEADER_ERROR_REASON => headers.error_reason = Some(value.to_string()),
                HEADER_FAILED_TIME => {
                    headers.failed_time = Some(parse_time(HEADER_FAILED_TIME, value)?)
                }
                _ => {}
            }
        }
        Ok(headers)
    }
}

fn parse_time(name: &'static str, value: &str) -> CodecResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| CodecError::InvalidHeader {
            name,
            value: value.to_string(),
        })
}

/// Unit of transfer between producer, broker and consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Envelope {
    /// Envelope for an operation event on the main route.
    pub fn for_event(
        id: &CorrelationId,
        event: &OperationEvent,
        now: DateTime<Utc>,
    ) -> CodecResult<Self> {
        Ok(Self::from_serialized(id, encode_event(event)?, event.retry_count, now))
    }

    /// Envelope around an already serialized event body.
    pub fn from_serialized(
        id: &CorrelationId,
        body: Vec<u8>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            headers: Headers {
                message_id: Some(id.clone()),
                retry_count: Some(retry_count),
                timestamp: Some(now),
                persistent: true,
                ..Headers::default()
            },
            body,
        }
    }

    /// Envelope for the dead-letter route.
    pub fn for_dead_letter(record: &DeadLetterRecord) -> CodecResult<Self> {
        Ok(Self {
            headers: Headers {
                message_id: record.correlation_id.clone(),
                retry_count: Some(record.retry_count),
                publish_retry: None,
                timestamp: Some(record.dead_letter_time),
                persistent: true,
                error_reason: Some(record.failure_reason.clone()),
                failed_time: Some(record.dead_letter_time),
            },
            body: encode_dead_letter(record)?,
        })
    }

    /// Retry counter from the `x-retry-count` header, 0 when absent.
    pub fn retry_count(&self) -> u32 {
        self.headers.retry_count.unwrap_or(0)
    }

    /// Producer-side confirmation retry counter, 0 for a first publish.
    pub fn publish_retry(&self) -> u32 {
        self.headers.publish_retry.unwrap_or(0)
    }

    pub fn message_id(&self) -> Option<&CorrelationId> {
        self.headers.message_id.as_ref()
    }

    /// Body as text, lossily decoded, for logs and dead-letter records.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
