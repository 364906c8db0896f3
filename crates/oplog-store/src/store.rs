//! Storage traits used by the consumers.

use crate::error::StoreResult;
use crate::models::OperationLog;
use async_trait::async_trait;
use oplog_envelope::{DeadLetterRecord, OperationEvent};

/// Persists operation events.
#[async_trait]
pub trait OperationLogStore: Send + Sync {
    /// Persist `event` as a new row and return it.
    async fn save(&self, event: &OperationEvent) -> StoreResult<OperationLog>;
}

/// Append-only storage for terminal failures.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Append `record`, returning its row id.
    async fn append(&self, record: &DeadLetterRecord) -> StoreResult<i64>;
}
