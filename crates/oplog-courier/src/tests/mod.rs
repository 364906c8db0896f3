//! Courier scenario tests.
//!
//! - `harness.rs`      - in-memory broker, flaky store and manual clock
//! - `consume.rs`      - persist, republish and dead-letter outcomes
//! - `dead_letters.rs` - dead-letter sink recording
//! - `pipeline.rs`     - producer and courier loops end to end

mod consume;
mod dead_letters;
mod pipeline;
