//! String key/value persistence.
//!
//! Models the browser-style local store the chat client writes to: each key
//! holds one serialized document, rewritten whole on every save.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wgpt_core::error::WgptError;

use crate::db::Database;

/// Well-known keys.
pub mod keys {
    /// Signed-in user record.
    pub const USER: &str = "wgpt_user";
    /// Serialized list of conversations.
    pub const CONVERSATIONS: &str = "wgpt_conversations";
}

/// Durable string key/value store.
pub trait LocalStore: Send + Sync {
    /// Read the value for `key`, if present.
    fn get(&self, key: &str) -> Result<Option<String>, WgptError>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), WgptError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), WgptError>;
}

// =============================================================================
// SQLite backend
// =============================================================================

/// `LocalStore` backed by the `local_store` table.
#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    db: Arc<Database>,
}

impl SqliteLocalStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, WgptError> {
        self.db.read(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), WgptError> {
        self.db.write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), WgptError> {
        self.db.delete(key).map(|_| ())
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Volatile `LocalStore`, used in tests and when no data directory is
/// available.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, WgptError> {
        self.entries
            .lock()
            .map_err(|e| WgptError::Storage(format!("Local store lock poisoned: {}", e)))
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, WgptError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), WgptError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), WgptError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
