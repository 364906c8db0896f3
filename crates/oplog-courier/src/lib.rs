//! oplog-courier: consuming side of the operation-audit pipeline.
//!
//! The courier moves operation events from the main queue into the record
//! store, and dead-lettered envelopes from the dead-letter queue into the
//! dead-letter table.
//!
//! # Core Invariants
//!
//! 1. **Always ACK**: every delivery is acked once, whatever its outcome
//! 2. **Bounded Retry**: a failed persist is republished with `retryCount+1`
//!    until it reaches `MAX_RETRY`, then dead-lettered
//! 3. **Malformed Is Final**: a payload that does not decode goes straight
//!    to the dead-letter queue and never re-enters the main queue
//! 4. **One In-Flight**: each route handles one delivery at a time (COUNT=1)
//!
//! # Architecture
//!
//! ```text
//! operation.log.queue -> OperationLogConsumer -> operation_logs
//!        ^                   |        |
//!        |__ republish ______|        v
//!                               dlx.queue -> DeadLetterSink -> dead_letters
//! ```

pub mod config;
pub mod consumer;
pub mod courier;
pub mod dead_letter;
pub mod error;

#[cfg(test)]
mod tests;

pub use config::{default_db_path, ConsumerConfig, CourierConfig};
pub use consumer::{OperationLogConsumer, Outcome};
pub use courier::Courier;
pub use dead_letter::{DeadLetterSink, UNKNOWN_REASON};
pub use error::{CourierError, CourierResult};
