//! Redis Streams broker.
//!
//! Each queue is a stream read through one consumer group. A publish is an
//! `XADD ... NOMKSTREAM`: Redis answering with an entry id is the ack, a nil
//! reply means the stream (queue) is not declared and the publish is
//! returned. Deliveries stay in the group's PEL until `XACK`; after a
//! (re)connect each route first re-reads this consumer's own PEL so entries
//! left unacked by a crash are delivered again.

use crate::broker::{Broker, Confirmation, Delivery};
use crate::error::{BrokerError, BrokerResult};
use crate::topology::{Route, Topology};
use async_trait::async_trait;
use oplog_envelope::Envelope;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Stream field holding the envelope body; every other field is a header.
pub const BODY_FIELD: &str = "body";

/// Connection settings for [`RedisBroker`].
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    pub redis_url: String,
    pub consumer_group: String,
    pub consumer_name: String,
    /// XREADGROUP BLOCK timeout in milliseconds.
    pub block_timeout_ms: u64,
    pub topology: Topology,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            consumer_group: "oplog-courier".to_string(),
            consumer_name: format!("courier-{}", std::process::id()),
            block_timeout_ms: 5000,
            topology: Topology::default(),
        }
    }
}

/// Broker backed by Redis Streams.
///
/// Blocking reads get a connection per route so a parked `XREADGROUP` never
/// delays publishes or acks on the writer connection.
pub struct RedisBroker {
    client: Client,
    writer: RwLock<MultiplexedConnection>,
    main_reader: RwLock<MultiplexedConnection>,
    dead_letter_reader: RwLock<MultiplexedConnection>,
    /// Per route: this consumer's PEL has not been re-read yet.
    main_backlog: AtomicBool,
    dead_letter_backlog: AtomicBool,
    config: RedisBrokerConfig,
}

impl RedisBroker {
    /// Connect and declare both queues.
    pub async fn connect(config: RedisBrokerConfig) -> BrokerResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let writer = client.get_multiplexed_async_connection().await?;
        let main_reader = client.get_multiplexed_async_connection().await?;
        let dead_letter_reader = client.get_multiplexed_async_connection().await?;

        let broker = Self {
            client,
            writer: RwLock::new(writer),
            main_reader: RwLock::new(main_reader),
            dead_letter_reader: RwLock::new(dead_letter_reader),
            main_backlog: AtomicBool::new(true),
            dead_letter_backlog: AtomicBool::new(true),
            config,
        };
        broker.declare_topology().await?;
        Ok(broker)
    }

    pub fn config(&self) -> &RedisBrokerConfig {
        &self.config
    }

    /// Create the stream and consumer group for every route.
    pub async fn declare_topology(&self) -> BrokerResult<()> {
        for route in [Route::Main, Route::DeadLetter] {
            self.ensure_consumer_group(route).await?;
        }
        Ok(())
    }

    async fn ensure_consumer_group(&self, route: Route) -> BrokerResult<()> {
        let queue = self.config.topology.queue(route);

        // Start at 0 so entries added before the group existed are still delivered.
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.writer())
            .await;

        match result {
            Ok(()) => {
                info!(
                    queue = %queue,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    queue = %queue,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Number of deliveries handed out on `route` and not yet acked.
    pub async fn pending_count(&self, route: Route) -> BrokerResult<i64> {
        let result: redis::Value = redis::cmd("XPENDING")
            .arg(self.config.topology.queue(route))
            .arg(&self.config.consumer_group)
            .query_async(&mut self.writer())
            .await?;

        // Response is [count, min_id, max_id, [[consumer, count], ...]]
        if let redis::Value::Array(arr) = result {
            if let Some(redis::Value::Int(count)) = arr.first() {
                return Ok(*count);
            }
        }

        Ok(0)
    }

    fn writer(&self) -> MultiplexedConnection {
        self.writer.read().clone()
    }

    fn backlog(&self, route: Route) -> &AtomicBool {
        match route {
            Route::Main => &self.main_backlog,
            Route::DeadLetter => &self.dead_letter_backlog,
        }
    }

    /// XREADGROUP COUNT 1 from `start`; `">"` blocks for new entries, `"0"`
    /// replays this consumer's pending entries without blocking.
    async fn read_group(&self, route: Route, start: &str) -> BrokerResult<Option<Delivery>> {
        let queue = self.config.topology.queue(route);

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1);
        if start == ">" {
            cmd.arg("BLOCK").arg(self.config.block_timeout_ms);
        }
        cmd.arg("STREAMS").arg(queue).arg(start);

        let result: RedisResult<redis::Value> = cmd.query_async(&mut self.reader(route)).await;

        match result {
            Ok(redis::Value::Nil) => Ok(None),
            Ok(value) => parse_xreadgroup_response(route, value),
            Err(e) => Err(e.into()),
        }
    }

    fn reader(&self, route: Route) -> MultiplexedConnection {
        match route {
            Route::Main => self.main_reader.read().clone(),
            Route::DeadLetter => self.dead_letter_reader.read().clone(),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, route: Route, envelope: &Envelope) -> BrokerResult<Confirmation> {
        let queue = self.config.topology.queue(route);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(queue).arg("NOMKSTREAM").arg("*");
        for (name, value) in envelope.headers.to_fields() {
            cmd.arg(name).arg(value);
        }
        cmd.arg(BODY_FIELD).arg(envelope.body.as_slice());

        let result: RedisResult<Option<String>> = cmd.query_async(&mut self.writer()).await;

        match result {
            Ok(Some(entry_id)) => {
                debug!(queue = %queue, entry_id = %entry_id, "Published envelope");
                Ok(Confirmation::Ack)
            }
            Ok(None) => Ok(Confirmation::Returned {
                reply_text: format!("NO_ROUTE: queue {} is not declared", queue),
            }),
            Err(e) if is_transport_error(&e) => Err(e.into()),
            Err(e) => Ok(Confirmation::Nack {
                cause: e.to_string(),
            }),
        }
    }

    async fn receive(&self, route: Route) -> BrokerResult<Option<Delivery>> {
        if self.backlog(route).load(Ordering::Acquire) {
            if let Some(delivery) = self.read_group(route, "0").await? {
                info!(
                    delivery_tag = %delivery.delivery_tag,
                    route = %route,
                    "Redelivering unacknowledged entry"
                );
                return Ok(Some(delivery));
            }
            self.backlog(route).store(false, Ordering::Release);
        }

        self.read_group(route, ">").await
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        let queue = self.config.topology.queue(delivery.route);

        let result: i64 = self
            .writer()
            .xack(queue, &self.config.consumer_group, &[&delivery.delivery_tag])
            .await?;

        if result == 1 {
            debug!(
                delivery_tag = %delivery.delivery_tag,
                queue = %queue,
                "Acknowledged delivery"
            );
        } else {
            warn!(
                delivery_tag = %delivery.delivery_tag,
                queue = %queue,
                "XACK returned {}, delivery may not exist",
                result
            );
        }

        Ok(())
    }

    async fn reconnect(&self) -> BrokerResult<()> {
        info!("Reconnecting to Redis...");
        let writer = self.client.get_multiplexed_async_connection().await?;
        let main_reader = self.client.get_multiplexed_async_connection().await?;
        let dead_letter_reader = self.client.get_multiplexed_async_connection().await?;
        *self.writer.write() = writer;
        *self.main_reader.write() = main_reader;
        *self.dead_letter_reader.write() = dead_letter_reader;
        self.main_backlog.store(true, Ordering::Release);
        self.dead_letter_backlog.store(true, Ordering::Release);
        self.declare_topology().await
    }
}

fn is_transport_error(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(s) => Some(String::from_utf8_lossy(s).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse an XREADGROUP reply into a delivery.
///
/// Reply format: `[[queue, [[entry_id, [field1, value1, ...]]]]]`. An entry
/// without a body field (or, when replaying the PEL, an entry deleted from
/// the stream and returned with nil fields) is delivered with an empty body
/// so the consumer dead-letters it instead of leaving it pending forever.
fn parse_xreadgroup_response(route: Route, value: redis::Value) -> BrokerResult<Option<Delivery>> {
    let streams = match value {
        redis::Value::Array(streams) => streams,
        redis::Value::Nil => return Ok(None),
        _ => {
            return Err(BrokerError::Protocol(format!(
                "Unexpected XREADGROUP response type: {:?}",
                value
            )))
        }
    };

    let stream = match streams.first() {
        Some(redis::Value::Array(s)) => s,
        Some(_) => {
            return Err(BrokerError::Protocol(
                "Expected array for stream entry".to_string(),
            ))
        }
        None => return Ok(None),
    };

    let entries = match stream.get(1) {
        Some(redis::Value::Array(e)) => e,
        _ => return Err(BrokerError::Protocol("Stream entry too short".to_string())),
    };

    let entry = match entries.first() {
        Some(redis::Value::Array(e)) => e,
        Some(_) => return Err(BrokerError::Protocol("Expected array for entry".to_string())),
        None => return Ok(None),
    };

    if entry.len() < 2 {
        return Err(BrokerError::Protocol("Entry too short".to_string()));
    }

    let delivery_tag = value_to_string(&entry[0]).ok_or_else(|| {
        BrokerError::Protocol(format!("Expected string for entry id, got {:?}", entry[0]))
    })?;

    let fields: &[redis::Value] = match &entry[1] {
        redis::Value::Array(f) => f,
        redis::Value::Nil => &[],
        _ => return Err(BrokerError::Protocol("Expected array for fields".to_string())),
    };

    let mut headers = Vec::with_capacity(fields.len() / 2);
    let mut body = Vec::new();
    for pair in fields.chunks_exact(2) {
        let Some(name) = value_to_string(&pair[0]) else {
            continue;
        };
        if name == BODY_FIELD {
            body = match &pair[1] {
                redis::Value::BulkString(b) => b.clone(),
                redis::Value::SimpleString(s) => s.as_bytes().to_vec(),
                _ => Vec::new(),
            };
        } else if let Some(value) = value_to_string(&pair[1]) {
            headers.push((name, value));
        }
    }

    debug!(
        delivery_tag = %delivery_tag,
        route = %route,
        body_len = body.len(),
        "Read delivery from stream"
    );

    Ok(Some(Delivery {
        route,
        delivery_tag,
        headers,
        body,
    }))
}
