//! Dead-letter record.

use crate::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Producer gave up after exhausting broker-confirmation retries.
pub const REASON_MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";
/// Consumer could not parse the payload.
pub const REASON_DESERIALIZATION_FAILED: &str = "deserialization failed";
/// Producer never got a broker response within the staleness window.
pub const REASON_EXPIRED: &str = "expired without confirmation";

/// Pipeline stage that gave up on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterSource {
    Producer,
    Consumer,
}

impl DeadLetterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "producer" => Some(Self::Producer),
            "consumer" => Some(Self::Consumer),
            _ => None,
        }
    }
}

impl fmt::Display for DeadLetterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-once record of an event that reached a terminal failure.
///
/// `payload` holds the original body as text; for malformed payloads this is
/// the raw bytes the consumer could not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub correlation_id: Option<CorrelationId>,
    pub payload: String,
    pub failure_reason: String,
    pub retry_count: u32,
    pub original_send_time: Option<DateTime<Utc>>,
    pub dead_letter_time: DateTime<Utc>,
    pub source: DeadLetterSource,
}
