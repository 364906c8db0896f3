//! In-memory store with injectable write failures.

use crate::models::OperationLog;
use crate::store::{DeadLetterStore, OperationLogStore};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use oplog_envelope::{DeadLetterRecord, OperationEvent};
use parking_lot::Mutex;

#[derive(Default)]
enum Failures {
    #[default]
    Off,
    Next(usize),
    Always,
}

#[derive(Default)]
struct Inner {
    logs: Vec<OperationLog>,
    dead_letters: Vec<DeadLetterRecord>,
    save_attempts: usize,
    failures: Failures,
    failure_message: String,
    append_failure: Option<String>,
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail with `message`.
    pub fn fail_next_saves(&self, count: usize, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.failures = Failures::Next(count);
        inner.failure_message = message.into();
    }

    /// Make every save fail with `message` until [`MemoryStore::heal`].
    pub fn fail_all_saves(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.failures = Failures::Always;
        inner.failure_message = message.into();
    }

    /// Make every dead-letter append fail with `message`.
    pub fn fail_appends(&self, message: impl Into<String>) {
        self.inner.lock().append_failure = Some(message.into());
    }

    /// Clear every injected failure.
    pub fn heal(&self) {
        let mut inner = self.inner.lock();
        inner.failures = Failures::Off;
        inner.append_failure = None;
    }

    pub fn logs(&self) -> Vec<OperationLog> {
        self.inner.lock().logs.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.inner.lock().dead_letters.clone()
    }

    /// Saves attempted so far, failed ones included.
    pub fn save_attempts(&self) -> usize {
        self.inner.lock().save_attempts
    }
}

#[async_trait]
impl OperationLogStore for MemoryStore {
    async fn save(&self, event: &OperationEvent) -> StoreResult<OperationLog> {
        let mut inner = self.inner.lock();
        inner.save_attempts += 1;

        let fail = match &mut inner.failures {
            Failures::Off | Failures::Next(0) => false,
            Failures::Next(left) => {
                *left -= 1;
                true
            }
            Failures::Always => true,
        };
        if fail {
            return Err(StoreError::Unavailable(inner.failure_message.clone()));
        }

        let log = OperationLog::from_event(event, Utc::now());
        inner.logs.push(log.clone());
        Ok(log)
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn append(&self, record: &DeadLetterRecord) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        if let Some(message) = &inner.append_failure {
            return Err(StoreError::Unavailable(message.clone()));
        }
        inner.dead_letters.push(record.clone());
        Ok(inner.dead_letters.len() as i64)
    }
}
