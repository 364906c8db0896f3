//! Broker seam for the operation-audit pipeline.
//!
//! The producer publishes envelopes and waits for a [`Confirmation`]; the
//! consumers pull [`Delivery`] values and ack them explicitly. Two transports
//! implement [`Broker`]:
//!
//! - [`RedisBroker`]: Redis Streams with one consumer group per queue
//! - [`InMemoryBroker`]: process-local queues with scriptable confirmations
//!
//! ```text
//! Producer --publish--> operation.log.queue --receive/ack--> Consumer
//!     |                                                         |
//!     +------------------> dlx.queue <--------------------------+
//! ```

pub mod broker;
pub mod error;
pub mod memory;
pub mod redis_broker;
pub mod topology;

pub use broker::{Broker, Confirmation, Delivery};
pub use error::{BrokerError, BrokerResult};
pub use memory::{InMemoryBroker, PublishAttempt, ScriptedConfirm};
pub use redis_broker::{RedisBroker, RedisBrokerConfig, BODY_FIELD};
pub use topology::{Binding, Route, Topology};
