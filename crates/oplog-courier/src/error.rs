//! Error types for the courier.

use thiserror::Error;

/// Courier error type.
#[derive(Error, Debug)]
pub enum CourierError {
    /// Broker connection or operation error
    #[error("Broker error: {0}")]
    Broker(#[from] oplog_broker::BrokerError),

    /// Record or dead-letter storage error
    #[error("Store error: {0}")]
    Store(#[from] oplog_store::StoreError),

    /// Payload or header encoding error
    #[error("Codec error: {0}")]
    Codec(#[from] oplog_envelope::CodecError),

    /// The broker answered a publish with something other than an ack
    #[error("Publish not confirmed: {0}")]
    NotConfirmed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for courier operations.
pub type CourierResult<T> = Result<T, CourierError>;
