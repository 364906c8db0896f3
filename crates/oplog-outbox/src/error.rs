//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Broker error
    #[error("Broker error: {0}")]
    Broker(#[from] oplog_broker::BrokerError),

    /// Encoding error
    #[error("Codec error: {0}")]
    Codec(#[from] oplog_envelope::CodecError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler no longer accepts jobs
    #[error("Scheduler is shut down")]
    SchedulerClosed,

    /// Dead-letter publish was not confirmed
    #[error("Dead-letter publish not confirmed: {0}")]
    DeadLetterRejected(String),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
