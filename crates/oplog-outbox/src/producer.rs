//! Operation-log producer with publisher confirms.
//!
//! `publish` registers the event in the pending store and returns at once;
//! the publish, its confirmation and every retry run on background tasks.
//! Failures never reach the caller: they end in a retry, a dead-letter
//! publish, or an expiry warning.

use crate::clock::{Clock, SystemClock};
use crate::config::{ProducerConfig, ReaperPolicy};
use crate::pending::{PendingEntry, PendingStore, RetryDecision};
use crate::scheduler::RetryScheduler;
use crate::{OutboxError, OutboxResult};
use oplog_broker::{Broker, Confirmation, Route};
use oplog_envelope::{
    encode_event, CorrelationId, DeadLetterRecord, DeadLetterSource, Envelope, OperationEvent,
    REASON_EXPIRED, REASON_MAX_RETRIES_EXCEEDED,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

struct ProducerInner {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    pending: PendingStore,
    scheduler: RetryScheduler,
    config: ProducerConfig,
    /// Retry decisions and dead-letter publishes still in progress.
    settling: AtomicUsize,
    settled: Notify,
}

/// Publishes operation events with confirmation tracking.
pub struct OperationLogProducer {
    inner: Arc<ProducerInner>,
}

impl OperationLogProducer {
    /// Create a producer and start its scheduler and reaper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        config: ProducerConfig,
    ) -> OutboxResult<Self> {
        config.validate()?;

        let scheduler = RetryScheduler::start(config.workers, clock.clone());
        let inner = Arc::new(ProducerInner {
            broker,
            clock,
            pending: PendingStore::new(),
            scheduler,
            config,
            settling: AtomicUsize::new(0),
            settled: Notify::new(),
        });

        let weak: Weak<ProducerInner> = Arc::downgrade(&inner);
        inner
            .scheduler
            .schedule_every(inner.config.reap_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.reap_expired();
                    }
                }
            })?;

        info!(
            max_retries = inner.config.max_retries,
            retry_delay_ms = inner.config.retry_delay.as_millis() as u64,
            reap_interval_secs = inner.config.reap_interval.as_secs(),
            pending_ttl_secs = inner.config.pending_ttl.as_secs(),
            reaper_policy = ?inner.config.reaper_policy,
            "Operation log producer started"
        );

        Ok(Self { inner })
    }

    /// Producer on wall-clock time with default settings.
    pub fn with_defaults(broker: Arc<dyn Broker>) -> OutboxResult<Self> {
        Self::new(broker, Arc::new(SystemClock), ProducerConfig::default())
    }

    /// Publish `event` and return its correlation id.
    ///
    /// Never blocks on the broker and never fails; the id is for logging.
    pub fn publish(&self, event: OperationEvent) -> CorrelationId {
        let id = CorrelationId::generate();

        let serialized = match encode_event(&event) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    correlation_id = %id,
                    action = %event.action,
                    error = %e,
                    "Failed to serialize operation event"
                );
                return id;
            }
        };

        debug!(
            correlation_id = %id,
            user_id = event.user_id,
            action = %event.action,
            "Publishing operation event"
        );

        self.inner.pending.insert(PendingEntry::new(
            id.clone(),
            serialized,
            self.inner.clock.now(),
            event,
        ));

        let inner = self.inner.clone();
        let task_id = id.clone();
        tokio::spawn(async move { inner.send_with_confirm(task_id).await });

        id
    }

    /// Entries still waiting for a positive confirmation.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.inner.pending.get(id).is_some()
    }

    /// Current retry counter of a pending entry.
    pub fn retry_count(&self, id: &CorrelationId) -> Option<u32> {
        self.inner.pending.get(id).map(|e| e.retry_count)
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.config
    }

    /// Run one reaper pass now. Returns the number of entries purged.
    pub fn reap_expired(&self) -> usize {
        self.inner.reap_expired()
    }

    /// Wait until nothing is pending and no dead-letter publish is in
    /// flight. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let settled = self.inner.settled.notified();
                if self.inner.is_settled() {
                    return;
                }
                settled.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Stop the scheduler workers and the reaper.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
        let remaining = self.inner.pending.len();
        if remaining > 0 {
            warn!(pending = remaining, "Producer stopped with unconfirmed events");
        }
    }
}

impl Drop for OperationLogProducer {
    fn drop(&mut self) {
        self.inner.scheduler.stop();
    }
}

impl ProducerInner {
    fn is_settled(&self) -> bool {
        self.settling.load(Ordering::Acquire) == 0 && self.pending.is_empty()
    }

    fn finish_settling(&self) {
        self.settling.fetch_sub(1, Ordering::AcqRel);
        self.settled.notify_waiters();
    }

    async fn send_with_confirm(self: Arc<Self>, id: CorrelationId) {
        let Some(entry) = self.pending.get(&id) else {
            debug!(correlation_id = %id, "Event no longer pending, skipping publish");
            return;
        };

        let envelope = entry.envelope(self.clock.now());
        let failure = match self.broker.publish(Route::Main, &envelope).await {
            Ok(Confirmation::Ack) => {
                if self.pending.confirm(&id).is_some() {
                    debug!(
                        correlation_id = %id,
                        retry_count = entry.retry_count,
                        "Broker confirmed event"
                    );
                }
                self.settled.notify_waiters();
                return;
            }
            Ok(Confirmation::Nack { cause }) => {
                warn!(
                    correlation_id = %id,
                    retry_count = entry.retry_count,
                    cause = %cause,
                    "Broker rejected event"
                );
                cause
            }
            Ok(Confirmation::Returned { reply_text }) => {
                warn!(
                    correlation_id = %id,
                    retry_count = entry.retry_count,
                    reply_text = %reply_text,
                    "Event could not be routed to a queue"
                );
                reply_text
            }
            Err(e) => {
                warn!(
                    correlation_id = %id,
                    retry_count = entry.retry_count,
                    error = %e,
                    "Publish failed"
                );
                e.to_string()
            }
        };

        self.retry(&id, &failure).await;
    }

    async fn retry(self: &Arc<Self>, id: &CorrelationId, failure: &str) {
        // Counted before the decision so drain never sees an exhausted
        // entry as settled while its dead-letter publish is still out.
        self.settling.fetch_add(1, Ordering::AcqRel);

        match self.pending.begin_retry(id, self.config.max_retries) {
            RetryDecision::Absent => {
                debug!(correlation_id = %id, "Retry for settled event ignored");
            }
            RetryDecision::AlreadyScheduled => {
                debug!(correlation_id = %id, "Retry already scheduled");
            }
            RetryDecision::Scheduled { retry_count } => {
                info!(
                    correlation_id = %id,
                    retry_count,
                    max_retries = self.config.max_retries,
                    delay_ms = self.config.retry_delay.as_millis() as u64,
                    "Scheduling publish retry"
                );
                let inner = self.clone();
                let job_id = id.clone();
                let scheduled = self
                    .scheduler
                    .schedule_after(self.config.retry_delay, async move { inner.resend(job_id) });
                if let Err(e) = scheduled {
                    warn!(correlation_id = %id, error = %e, "Could not schedule retry");
                }
            }
            RetryDecision::Exhausted(entry) => {
                error!(
                    correlation_id = %id,
                    retry_count = entry.retry_count,
                    max_retries = self.config.max_retries,
                    last_failure = %failure,
                    "Retries exhausted, sending event to dead-letter queue"
                );
                self.dead_letter(entry, REASON_MAX_RETRIES_EXCEEDED).await;
            }
        }

        self.finish_settling();
    }

    /// Worker job: publish a scheduled retry.
    fn resend(self: Arc<Self>, id: CorrelationId) {
        match self.pending.take_for_resend(&id) {
            Some(entry) => {
                info!(correlation_id = %id, retry_count = entry.retry_count, "Retrying publish");
                tokio::spawn(self.send_with_confirm(id));
            }
            None => debug!(correlation_id = %id, "Event settled before its retry ran"),
        }
    }

    async fn dead_letter(&self, entry: PendingEntry, reason: &str) {
        let id = entry.correlation_id.clone();
        let retry_count = entry.retry_count;
        match self.publish_dead_letter(entry, reason).await {
            Ok(()) => info!(
                correlation_id = %id,
                retry_count,
                reason = %reason,
                "Event sent to dead-letter queue"
            ),
            Err(e) => error!(
                correlation_id = %id,
                retry_count,
                reason = %reason,
                error = %e,
                "Failed to send event to dead-letter queue"
            ),
        }
    }

    async fn publish_dead_letter(&self, entry: PendingEntry, reason: &str) -> OutboxResult<()> {
        let record = DeadLetterRecord {
            correlation_id: Some(entry.correlation_id.clone()),
            payload: entry.payload_text(),
            failure_reason: reason.to_string(),
            retry_count: entry.retry_count,
            original_send_time: Some(entry.send_time),
            dead_letter_time: self.clock.now(),
            source: DeadLetterSource::Producer,
        };
        let envelope = Envelope::for_dead_letter(&record)?;

        match self.broker.publish(Route::DeadLetter, &envelope).await? {
            Confirmation::Ack => Ok(()),
            other => Err(OutboxError::DeadLetterRejected(
                other.cause().unwrap_or_default().to_string(),
            )),
        }
    }

    fn reap_expired(self: &Arc<Self>) -> usize {
        self.settling.fetch_add(1, Ordering::AcqRel);

        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.pending_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let expired = self.pending.purge_older_than(now - ttl);

        for entry in &expired {
            warn!(
                correlation_id = %entry.correlation_id,
                send_time = %entry.send_time,
                retry_count = entry.retry_count,
                "Pending message purged as expired"
            );
        }

        if !expired.is_empty() {
            info!(
                purged = expired.len(),
                remaining = self.pending.len(),
                "Reaper pass complete"
            );
        }

        let purged = expired.len();
        if self.config.reaper_policy == ReaperPolicy::DeadLetter {
            for entry in expired {
                self.settling.fetch_add(1, Ordering::AcqRel);
                let inner = self.clone();
                tokio::spawn(async move {
                    inner.dead_letter(entry, REASON_EXPIRED).await;
                    inner.finish_settling();
                });
            }
        }

        self.finish_settling();
        purged
    }
}
