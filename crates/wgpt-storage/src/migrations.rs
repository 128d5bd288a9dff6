//! Database schema migrations.
//!
//! The schema is a single key/value table mirroring a browser-style local
//! store, plus the `schema_migrations` bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use wgpt_core::error::WgptError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), WgptError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| WgptError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| WgptError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: local_store");
    }

    Ok(())
}

/// Version 1: key/value local store.
fn apply_v1(conn: &Connection) -> Result<(), WgptError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_store (
            key         TEXT PRIMARY KEY NOT NULL,
            value       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'local_store');
        ",
    )
    .map_err(|e| WgptError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
