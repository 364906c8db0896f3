//! In-memory broker.
//!
//! Queues live in process memory. Every publish consumes the next scripted
//! confirmation for its route (default [`ScriptedConfirm::Ack`]), which lets
//! tests drive nacks, returns, transport failures and silence.

use crate::broker::{Broker, Confirmation, Delivery};
use crate::error::{BrokerError, BrokerResult};
use crate::topology::Route;
use async_trait::async_trait;
use oplog_envelope::Envelope;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Outcome the in-memory broker gives to the next publish on a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedConfirm {
    Ack,
    Nack(String),
    Return(String),
    /// Publish fails with a transport error.
    Fail(String),
    /// Publish never completes.
    Silent,
}

/// One publish attempt as the broker saw it.
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub route: Route,
    pub envelope: Envelope,
    pub outcome: ScriptedConfirm,
}

#[derive(Default)]
struct State {
    queues: HashMap<Route, VecDeque<Delivery>>,
    unacked: HashMap<String, Delivery>,
    acked: Vec<String>,
    attempts: Vec<PublishAttempt>,
    scripts: HashMap<Route, VecDeque<ScriptedConfirm>>,
    next_tag: u64,
}

impl State {
    fn enqueue(&mut self, route: Route, headers: Vec<(String, String)>, body: Vec<u8>) {
        self.next_tag += 1;
        let delivery = Delivery {
            route,
            delivery_tag: format!("{}-{}", route, self.next_tag),
            headers,
            body,
        };
        self.queues.entry(route).or_default().push_back(delivery);
    }
}

/// Broker backed by process memory.
pub struct InMemoryBroker {
    state: Mutex<State>,
    changed: Notify,
    block_timeout: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl InMemoryBroker {
    /// `block_timeout` bounds how long [`Broker::receive`] waits on an empty queue.
    pub fn new(block_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            changed: Notify::new(),
            block_timeout,
        }
    }

    /// Queue confirmations for the next publishes on `route`.
    pub fn script(&self, route: Route, outcomes: impl IntoIterator<Item = ScriptedConfirm>) {
        self.state
            .lock()
            .scripts
            .entry(route)
            .or_default()
            .extend(outcomes);
    }

    /// Put a raw message straight onto a queue, bypassing publish.
    pub fn inject(&self, route: Route, headers: Vec<(String, String)>, body: Vec<u8>) {
        self.state.lock().enqueue(route, headers, body);
        self.changed.notify_waiters();
    }

    /// Every publish attempt on `route`, in order.
    pub fn attempts(&self, route: Route) -> Vec<PublishAttempt> {
        self.state
            .lock()
            .attempts
            .iter()
            .filter(|a| a.route == route)
            .cloned()
            .collect()
    }

    /// Messages waiting on `route`'s queue.
    pub fn queued(&self, route: Route) -> Vec<Delivery> {
        self.state
            .lock()
            .queues
            .get(&route)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivery tags acked so far.
    pub fn acked(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    /// Deliveries handed out and not yet acked.
    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Wait until `route` has seen at least `count` publish attempts.
    pub async fn wait_for_attempts(&self, route: Route, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if self.attempts(route).len() >= count {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn take_next(&self, route: Route) -> Option<Delivery> {
        let mut state = self.state.lock();
        let delivery = state.queues.get_mut(&route)?.pop_front()?;
        state
            .unacked
            .insert(delivery.delivery_tag.clone(), delivery.clone());
        Some(delivery)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, route: Route, envelope: &Envelope) -> BrokerResult<Confirmation> {
        let outcome = {
            let mut state = self.state.lock();
            let outcome = state
                .scripts
                .get_mut(&route)
                .and_then(VecDeque::pop_front)
                .unwrap_or(ScriptedConfirm::Ack);
            state.attempts.push(PublishAttempt {
                route,
                envelope: envelope.clone(),
                outcome: outcome.clone(),
            });
            if outcome == ScriptedConfirm::Ack {
                let headers = envelope
                    .headers
                    .to_fields()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect();
                state.enqueue(route, headers, envelope.body.clone());
            }
            outcome
        };
        self.changed.notify_waiters();

        debug!(route = %route, outcome = ?outcome, "In-memory publish");

        match outcome {
            ScriptedConfirm::Ack => Ok(Confirmation::Ack),
            ScriptedConfirm::Nack(cause) => Ok(Confirmation::Nack { cause }),
            ScriptedConfirm::Return(reply_text) => Ok(Confirmation::Returned { reply_text }),
            ScriptedConfirm::Fail(reason) => Err(BrokerError::Unavailable(reason)),
            ScriptedConfirm::Silent => std::future::pending().await,
        }
    }

    async fn receive(&self, route: Route) -> BrokerResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + self.block_timeout;
        loop {
            let changed = self.changed.notified();
            if let Some(delivery) = self.take_next(route) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        let mut state = self.state.lock();
        if state.unacked.remove(&delivery.delivery_tag).is_none() {
            return Err(BrokerError::UnknownDelivery(delivery.delivery_tag.clone()));
        }
        state.acked.push(delivery.delivery_tag.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oplog_envelope::CorrelationId;

    fn envelope(id: &str) -> Envelope {
        Envelope::from_serialized(&CorrelationId::from_string(id), b"{}".to_vec(), 0, Utc::now())
    }

    #[tokio::test]
    async fn test_unscripted_publish_is_acked_and_queued() {
        let broker = InMemoryBroker::default();
        let confirm = broker.publish(Route::Main, &envelope("a")).await.unwrap();
        assert_eq!(confirm, Confirmation::Ack);
        assert_eq!(broker.queued(Route::Main).len(), 1);
        assert!(broker.queued(Route::DeadLetter).is_empty());
    }

    #[tokio::test]
    async fn test_scripted_outcomes_are_consumed_in_order() {
        let broker = InMemoryBroker::default();
        broker.script(
            Route::Main,
            [
                ScriptedConfirm::Nack("full".to_string()),
                ScriptedConfirm::Return("NO_ROUTE".to_string()),
                ScriptedConfirm::Fail("connection reset".to_string()),
            ],
        );

        let first = broker.publish(Route::Main, &envelope("a")).await.unwrap();
        assert!(matches!(first, Confirmation::Nack { .. }));
        let second = broker.publish(Route::Main, &envelope("a")).await.unwrap();
        assert!(matches!(second, Confirmation::Returned { .. }));
        let third = broker.publish(Route::Main, &envelope("a")).await;
        assert!(matches!(third, Err(BrokerError::Unavailable(_))));
        let fourth = broker.publish(Route::Main, &envelope("a")).await.unwrap();
        assert!(fourth.is_ack());

        assert_eq!(broker.attempts(Route::Main).len(), 4);
        assert_eq!(broker.queued(Route::Main).len(), 1);
    }

    #[tokio::test]
    async fn test_receive_then_ack() {
        let broker = InMemoryBroker::default();
        broker.publish(Route::Main, &envelope("a")).await.unwrap();

        let delivery = broker.receive(Route::Main).await.unwrap().unwrap();
        assert_eq!(delivery.envelope().unwrap().message_id().unwrap().as_str(), "a");
        assert_eq!(broker.unacked_count(), 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.acked(), vec![delivery.delivery_tag.clone()]);
        assert!(broker.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_times_out_on_empty_queue() {
        let broker = InMemoryBroker::new(Duration::from_millis(10));
        assert!(broker.receive(Route::Main).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let broker = std::sync::Arc::new(InMemoryBroker::new(Duration::from_secs(5)));
        let receiver = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.receive(Route::DeadLetter).await })
        };
        tokio::task::yield_now().await;
        broker.publish(Route::DeadLetter, &envelope("d")).await.unwrap();

        let delivery = receiver.await.unwrap().unwrap();
        assert!(delivery.is_some());
    }

    #[tokio::test]
    async fn test_inject_raw_delivery() {
        let broker = InMemoryBroker::default();
        broker.inject(Route::Main, vec![], b"not json".to_vec());
        let delivery = broker.receive(Route::Main).await.unwrap().unwrap();
        assert_eq!(delivery.body_text(), "not json");
    }
}
