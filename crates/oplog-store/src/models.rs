//! Persisted rows.

use chrono::{DateTime, Utc};
use oplog_envelope::{DeadLetterRecord, OperationEvent};

/// One persisted operation-log row.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationLog {
    /// ULID, sortable by creation time.
    pub log_id: String,
    pub user_id: i64,
    pub action: String,
    pub ip: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl OperationLog {
    /// New row for `event` with a fresh id.
    pub fn from_event(event: &OperationEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            log_id: ulid::Ulid::new().to_string(),
            user_id: event.user_id,
            action: event.action.clone(),
            ip: event.ip.clone(),
            detail: event.detail.clone(),
            created_at,
        }
    }
}

/// A dead-letter record as stored, with its row id and storage time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDeadLetter {
    pub id: i64,
    pub record: DeadLetterRecord,
    pub recorded_at: DateTime<Utc>,
}
