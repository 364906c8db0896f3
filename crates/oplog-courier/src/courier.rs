//! Consumer and dead-letter loop orchestration.

use crate::config::ConsumerConfig;
use crate::consumer::OperationLogConsumer;
use crate::dead_letter::DeadLetterSink;
use crate::error::CourierResult;
use oplog_broker::{Broker, Delivery, Route};
use oplog_outbox::Clock;
use oplog_store::{DeadLetterStore, OperationLogStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause after a broker error before reconnecting.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Pause after a failed reconnect.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Runs the operation-log consumer and the dead-letter sink.
///
/// Each route is read one delivery at a time (COUNT=1), so a route never has
/// more than one delivery in flight.
pub struct Courier {
    broker: Arc<dyn Broker>,
    consumer: OperationLogConsumer,
    sink: DeadLetterSink,
}

impl Courier {
    pub fn new(
        broker: Arc<dyn Broker>,
        logs: Arc<dyn OperationLogStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            consumer: OperationLogConsumer::new(broker.clone(), logs, clock.clone(), config),
            sink: DeadLetterSink::new(broker.clone(), dead_letters, clock),
            broker,
        }
    }

    pub fn consumer(&self) -> &OperationLogConsumer {
        &self.consumer
    }

    pub fn sink(&self) -> &DeadLetterSink {
        &self.sink
    }

    /// Run both loops until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> CourierResult<()> {
        info!("Starting operation log courier");

        tokio::join!(
            self.poll(Route::Main, shutdown.clone()),
            self.poll(Route::DeadLetter, shutdown),
        );

        info!("Operation log courier stopped");
        Ok(())
    }

    /// Read and handle deliveries from `route`.
    ///
    /// Broker errors never end the loop: it pauses, reconnects and carries on.
    async fn poll(&self, route: Route, mut shutdown: watch::Receiver<bool>) {
        info!(route = %route, "Consumer loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.broker.receive(route) => received,
            };

            match received {
                Ok(Some(delivery)) => self.dispatch(&delivery).await,
                Ok(None) => {
                    debug!(route = %route, "No deliveries available, continuing to poll...");
                }
                Err(e) => {
                    error!(route = %route, error = %e, "Error receiving delivery");
                    warn!(route = %route, "Broker error, attempting to reconnect...");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    if let Err(reconnect_err) = self.broker.reconnect().await {
                        error!(error = %reconnect_err, "Failed to reconnect to broker");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
        }

        info!(route = %route, "Consumer loop stopped");
    }

    async fn dispatch(&self, delivery: &Delivery) {
        match delivery.route {
            Route::Main => {
                let outcome = self.consumer.handle(delivery).await;
                debug!(delivery_tag = %delivery.delivery_tag, outcome = ?outcome, "Delivery handled");
            }
            Route::DeadLetter => {
                self.sink.handle(delivery).await;
            }
        }
    }
}
