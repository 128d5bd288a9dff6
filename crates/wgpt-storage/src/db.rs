//! SQLite file holding the client's local store.
//!
//! One connection per file, guarded by a mutex. Every statement the client
//! needs is a single-row read, upsert or delete on the `local_store` table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use wgpt_core::error::WgptError;

use crate::migrations;

fn storage_err(context: &str, key: &str, err: rusqlite::Error) -> WgptError {
    WgptError::Storage(format!("{} {}: {}", context, key, err))
}

/// Key/value table on a single SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the store file at `path`, creating it and its directory on first
    /// run. Uses WAL journaling.
    pub fn open(path: &Path) -> Result<Self, WgptError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| WgptError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| WgptError::Storage(format!("Failed to configure journal: {}", e)))?;

        let db = Self::prepare(conn)?;
        info!(path = %path.display(), "Local store file ready");
        Ok(db)
    }

    /// A store that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self, WgptError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WgptError::Storage(format!("Failed to open in-memory store: {}", e)))?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, WgptError> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, WgptError> {
        self.conn
            .lock()
            .map_err(|e| WgptError::Storage(format!("Local store lock poisoned: {}", e)))
    }

    /// Value stored under `key`.
    pub fn read(&self, key: &str) -> Result<Option<String>, WgptError> {
        self.lock()?
            .query_row(
                "SELECT value FROM local_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("Failed to read", key, e))
    }

    /// Insert or replace the value under `key` and stamp `updated_at`.
    pub fn write(&self, key: &str, value: &str) -> Result<(), WgptError> {
        self.lock()?
            .execute(
                "INSERT INTO local_store (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value],
            )
            .map_err(|e| storage_err("Failed to write", key, e))?;
        debug!(key, bytes = value.len(), "Local store write");
        Ok(())
    }

    /// Delete `key`. Returns whether a row existed.
    pub fn delete(&self, key: &str) -> Result<bool, WgptError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM local_store WHERE key = ?1", params![key])
            .map_err(|e| storage_err("Failed to remove", key, e))?;
        if removed > 0 {
            debug!(key, "Local store delete");
        }
        Ok(removed > 0)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
