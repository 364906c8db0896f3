//! Schema migrations, applied in order and tracked in `migrations`.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_operation_logs(conn)?;
    }
    if current_version < 2 {
        migrate_v2_dead_letters(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: operation-log rows.
fn migrate_v1_operation_logs(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE operation_logs (
            log_id TEXT PRIMARY KEY NOT NULL,
            user_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            ip TEXT NOT NULL,
            detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_operation_logs_user ON operation_logs(user_id);
        CREATE INDEX idx_operation_logs_created ON operation_logs(created_at);",
    )?;
    record_migration(conn, 1, "operation_logs")
}

/// V2: append-only dead-letter records.
fn migrate_v2_dead_letters(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            correlation_id TEXT,
            payload TEXT NOT NULL,
            failure_reason TEXT NOT NULL,
            retry_count INTEGER NOT NULL,
            original_send_time TEXT,
            dead_letter_time TEXT NOT NULL,
            source TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX idx_dead_letters_correlation ON dead_letters(correlation_id);",
    )?;
    record_migration(conn, 2, "dead_letters")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('operation_logs', 'dead_letters')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
