//! Pending-message store.
//!
//! Tracks every published envelope until the broker confirms it, the retry
//! budget runs out, or the reaper purges it. All transitions happen under
//! one lock, so a retry decision and the matching counter update are atomic.
//!
//! ```text
//! AwaitingConfirm --nack--> RetryScheduled --resend--> AwaitingConfirm
//!        |                                                  |
//!        +--ack--> (removed: confirmed)                     |
//!        +--budget spent--> (removed: dead-lettered) <------+
//!        +--older than ttl--> (removed: expired)
//! ```

use chrono::{DateTime, Utc};
use oplog_envelope::{CorrelationId, Envelope, OperationEvent};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// A publish is out and its confirmation has not arrived.
    AwaitingConfirm,
    /// A re-publish is scheduled; further failures are ignored until it runs.
    RetryScheduled,
}

/// One in-flight outbound event.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub correlation_id: CorrelationId,
    pub serialized: Vec<u8>,
    pub send_time: DateTime<Utc>,
    pub retry_count: u32,
    pub original: OperationEvent,
    pub state: PendingState,
}

impl PendingEntry {
    pub fn new(
        correlation_id: CorrelationId,
        serialized: Vec<u8>,
        send_time: DateTime<Utc>,
        original: OperationEvent,
    ) -> Self {
        Self {
            correlation_id,
            serialized,
            send_time,
            retry_count: 0,
            original,
            state: PendingState::AwaitingConfirm,
        }
    }

    /// Envelope for the next publish of this entry.
    pub fn envelope(&self, now: DateTime<Utc>) -> Envelope {
        let mut envelope = Envelope::from_serialized(
            &self.correlation_id,
            self.serialized.clone(),
            self.original.retry_count,
            now,
        );
        envelope.headers.publish_retry = (self.retry_count > 0).then_some(self.retry_count);
        envelope
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.serialized).into_owned()
    }
}

/// Result of asking for a retry.
#[derive(Debug)]
pub enum RetryDecision {
    /// The entry is gone (confirmed, dead-lettered or reaped).
    Absent,
    /// A retry is already scheduled for this id.
    AlreadyScheduled,
    /// A retry was scheduled; `retry_count` is the new counter value.
    Scheduled { retry_count: u32 },
    /// The budget is spent; the entry was removed and is handed back.
    Exhausted(PendingEntry),
}

/// Concurrent map of pending entries keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingStore {
    entries: Mutex<HashMap<CorrelationId, PendingEntry>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: PendingEntry) {
        self.entries
            .lock()
            .insert(entry.correlation_id.clone(), entry);
    }

    /// Remove on positive confirmation.
    pub fn confirm(&self, id: &CorrelationId) -> Option<PendingEntry> {
        self.entries.lock().remove(id)
    }

    /// Decide what a failed publish of `id` leads to.
    pub fn begin_retry(&self, id: &CorrelationId, max_retries: u32) -> RetryDecision {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else {
            return RetryDecision::Absent;
        };

        if entry.state == PendingState::RetryScheduled {
            return RetryDecision::AlreadyScheduled;
        }

        if entry.retry_count >= max_retries {
            return match entries.remove(id) {
                Some(entry) => RetryDecision::Exhausted(entry),
                None => RetryDecision::Absent,
            };
        }

        entry.retry_count += 1;
        entry.state = PendingState::RetryScheduled;
        RetryDecision::Scheduled {
            retry_count: entry.retry_count,
        }
    }

    /// Flip a scheduled entry back to awaiting confirmation and return a
    /// snapshot to publish. `None` if the entry disappeared meanwhile.
    pub fn take_for_resend(&self, id: &CorrelationId) -> Option<PendingEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.state = PendingState::AwaitingConfirm;
        Some(entry.clone())
    }

    pub fn get(&self, id: &CorrelationId) -> Option<PendingEntry> {
        self.entries.lock().get(id).cloned()
    }

    /// Remove and return every entry sent before `cutoff`.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Vec<PendingEntry> {
        let mut entries = self.entries.lock();
        let expired: Vec<CorrelationId> = entries
            .iter()
            .filter(|(_, e)| e.send_time < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
