//! Reliable producer side of the operation-audit pipeline.
//!
//! This crate provides:
//! - [`OperationLogProducer`]: fire-and-forget publish with confirmation
//!   tracking, bounded delayed retries and dead-lettering
//! - [`PendingStore`]: the in-flight map and its retry state machine
//! - [`RetryScheduler`]: fixed worker pool running delayed retries and the
//!   periodic reaper
//! - [`Clock`]: injectable time, with [`SystemClock`] and [`ManualClock`]

mod clock;
mod config;
mod error;
mod pending;
mod producer;
mod scheduler;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, Sleep, SystemClock};
pub use config::{ProducerConfig, ReaperPolicy, MAX_RETRY};
pub use error::{OutboxError, OutboxResult};
pub use pending::{PendingEntry, PendingState, PendingStore, RetryDecision};
pub use producer::OperationLogProducer;
pub use scheduler::RetryScheduler;
