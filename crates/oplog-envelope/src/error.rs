//! Codec error types.

use thiserror::Error;

/// Codec error type.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload is not valid JSON or does not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A transport header carried a value that cannot be parsed
    #[error("Invalid header {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },
}

/// Result type alias using CodecError.
pub type CodecResult<T> = Result<T, CodecError>;
