//! SQLite store on a dedicated executor thread.
//!
//! Only SQL runs inside `call()`; row conversion and id generation happen
//! on the caller's task.

use crate::models::{OperationLog, StoredDeadLetter};
use crate::store::{DeadLetterStore, OperationLogStore};
use crate::{migrations, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oplog_envelope::{CorrelationId, DeadLetterRecord, DeadLetterSource, OperationEvent};
use rusqlite::params;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Operation-log and dead-letter tables in one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
    path: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening store");

        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            conn,
            path: path_str,
        };
        store
            .call_sqlite(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    PRAGMA busy_timeout = 5000;
                    ",
                )
            })
            .await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self {
            conn,
            path: ":memory:".to_string(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        self.call(|conn| migrations::run_migrations(conn)).await
    }

    /// Run `f` on the executor thread.
    async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    async fn call_sqlite<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Most recent operation logs, newest first.
    pub async fn recent_operation_logs(&self, limit: usize) -> StoreResult<Vec<OperationLog>> {
        let rows = self
            .call_sqlite(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT log_id, user_id, action, ip, detail, created_at
                     FROM operation_logs ORDER BY log_id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit as i64], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(log_id, user_id, action, ip, detail, created_at)| {
                Ok(OperationLog {
                    log_id,
                    user_id,
                    action,
                    ip,
                    detail,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }

    /// Most recent dead letters, newest first.
    pub async fn recent_dead_letters(&self, limit: usize) -> StoreResult<Vec<StoredDeadLetter>> {
        let rows = self
            .call_sqlite(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, correlation_id, payload, failure_reason, retry_count,
                            original_send_time, dead_letter_time, source, recorded_at
                     FROM dead_letters ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit as i64], |row| {
                        Ok(DeadLetterRow {
                            id: row.get(0)?,
                            correlation_id: row.get(1)?,
                            payload: row.get(2)?,
                            failure_reason: row.get(3)?,
                            retry_count: row.get(4)?,
                            original_send_time: row.get(5)?,
                            dead_letter_time: row.get(6)?,
                            source: row.get(7)?,
                            recorded_at: row.get(8)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(DeadLetterRow::into_stored).collect()
    }

    pub async fn count_operation_logs(&self) -> StoreResult<i64> {
        self.call_sqlite(|conn| {
            conn.query_row("SELECT COUNT(*) FROM operation_logs", [], |row| row.get(0))
        })
        .await
    }

    pub async fn count_dead_letters(&self) -> StoreResult<i64> {
        self.call_sqlite(|conn| {
            conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))
        })
        .await
    }
}

#[async_trait]
impl OperationLogStore for SqliteStore {
    async fn save(&self, event: &OperationEvent) -> StoreResult<OperationLog> {
        let log = OperationLog::from_event(event, Utc::now());
        let row = log.clone();

        self.call_sqlite(move |conn| {
            conn.execute(
                "INSERT INTO operation_logs (log_id, user_id, action, ip, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.log_id,
                    row.user_id,
                    row.action,
                    row.ip,
                    row.detail,
                    row.created_at.to_rfc3339(),
                ],
            )
        })
        .await?;

        debug!(log_id = %log.log_id, user_id = log.user_id, action = %log.action, "Operation log saved");
        Ok(log)
    }
}

#[async_trait]
impl DeadLetterStore for SqliteStore {
    async fn append(&self, record: &DeadLetterRecord) -> StoreResult<i64> {
        let record = record.clone();
        let recorded_at = Utc::now().to_rfc3339();

        self.call_sqlite(move |conn| {
            conn.execute(
                "INSERT INTO dead_letters (correlation_id, payload, failure_reason, retry_count,
                    original_send_time, dead_letter_time, source, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.correlation_id.as_ref().map(|id| id.as_str().to_string()),
                    record.payload,
                    record.failure_reason,
                    record.retry_count,
                    record.original_send_time.map(|t| t.to_rfc3339()),
                    record.dead_letter_time.to_rfc3339(),
                    record.source.as_str(),
                    recorded_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }
}

struct DeadLetterRow {
    id: i64,
    correlation_id: Option<String>,
    payload: String,
    failure_reason: String,
    retry_count: u32,
    original_send_time: Option<String>,
    dead_letter_time: String,
    source: String,
    recorded_at: String,
}

impl DeadLetterRow {
    fn into_stored(self) -> StoreResult<StoredDeadLetter> {
        let source = DeadLetterSource::parse(&self.source)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown source: {}", self.source)))?;
        Ok(StoredDeadLetter {
            id: self.id,
            record: DeadLetterRecord {
                correlation_id: self.correlation_id.map(CorrelationId::from_string),
                payload: self.payload,
                failure_reason: self.failure_reason,
                retry_count: self.retry_count,
                original_send_time: self
                    .original_send_time
                    .as_deref()
                    .map(parse_time)
                    .transpose()?,
                dead_letter_time: parse_time(&self.dead_letter_time)?,
                source,
            },
            recorded_at: parse_time(&self.recorded_at)?,
        })
    }
}

fn parse_time(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp {value:?}: {e}")))
}
