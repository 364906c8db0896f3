//! Wire types for operation-audit events.
//!
//! This crate provides:
//! - [`OperationEvent`]: the JSON payload `{userId, action, ip, detail, timestamp, retryCount}`
//! - [`Envelope`]: payload bytes plus transport headers (`messageId`, `x-retry-count`, ...)
//! - [`DeadLetterRecord`]: the write-once record of an event that could not be delivered
//! - the JSON codec used by both the producer and the courier

mod codec;
mod dead_letter;
mod envelope;
mod error;
mod event;

pub use codec::{decode_dead_letter, decode_event, encode_dead_letter, encode_event};
pub use dead_letter::{
    DeadLetterRecord, DeadLetterSource, REASON_DESERIALIZATION_FAILED, REASON_EXPIRED,
    REASON_MAX_RETRIES_EXCEEDED,
};
pub use envelope::{
    CorrelationId, Envelope, Headers, DELIVERY_MODE_PERSISTENT, HEADER_DELIVERY_MODE,
    HEADER_ERROR_REASON, HEADER_FAILED_TIME, HEADER_MESSAGE_ID, HEADER_PUBLISH_RETRY,
    HEADER_RETRY_COUNT, HEADER_TIMESTAMP,
};
pub use error::{CodecError, CodecResult};
pub use event::{actions, OperationEvent};
