//! Durable storage for the operation-audit pipeline.
//!
//! - [`OperationLogStore`]: the persistence step of the main consumer
//! - [`DeadLetterStore`]: append-only record of terminal failures
//!
//! [`SqliteStore`] implements both on a single SQLite file; [`MemoryStore`]
//! keeps rows in memory and can be told to fail writes.

mod error;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{OperationLog, StoredDeadLetter};
pub use sqlite::SqliteStore;
pub use store::{DeadLetterStore, OperationLogStore};
