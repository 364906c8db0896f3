//! Producer scenario tests.
//!
//! - `harness.rs` - in-memory broker, manual clock and log capture
//! - `confirm.rs` - positive confirmations and concurrent publishes
//! - `retry.rs`   - negative confirmations, retries and dead-lettering
//! - `reaper.rs`  - expiry of entries that never get a confirmation
