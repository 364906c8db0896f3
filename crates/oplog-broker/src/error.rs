//! Error types for the broker layer.

use thiserror::Error;

/// Broker error type.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Protocol error (unexpected reply shape)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker could not be reached
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Delivery tag is not outstanding
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
