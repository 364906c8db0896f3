//! JSON codec for event payloads and dead-letter records.

use crate::{CodecResult, DeadLetterRecord, OperationEvent};

/// Serialize an event to its wire form.
pub fn encode_event(event: &OperationEvent) -> CodecResult<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

/// Parse an event from its wire form.
pub fn decode_event(body: &[u8]) -> CodecResult<OperationEvent> {
    Ok(serde_json::from_slice(body)?)
}

/// Serialize a dead-letter record.
pub fn encode_dead_letter(record: &DeadLetterRecord) -> CodecResult<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Parse a dead-letter record.
pub fn decode_dead_letter(body: &[u8]) -> CodecResult<DeadLetterRecord> {
    Ok(serde_json::from_slice(body)?)
}
