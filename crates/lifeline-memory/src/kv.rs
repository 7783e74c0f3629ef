//! Raw key-value persistence.
//!
//! # Storage layout
//!
//! [`SqliteKv`] keeps a single table `agent_memory`:
//!
//! | column     | type | description                          |
//! |------------|------|--------------------------------------|
//! | key        | TEXT | primary key                          |
//! | value      | TEXT | string-encoded value                 |
//! | updated_at | TEXT | RFC-3339 last-write timestamp (UTC)  |

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::StoreError;

/// Synchronous, durable key-value contract.
///
/// Implementations do not need to be thread-safe; [`StateStore`][crate::StateStore]
/// serialises all access behind one mutex.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteKv
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed [`KeyValueStore`].
pub struct SqliteKv {
    conn: Connection,
}

impl SqliteKv {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let kv = Self { conn };
        kv.init_schema()?;
        Ok(kv)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let kv = Self { conn };
        kv.init_schema()?;
        Ok(kv)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_memory (
                key        TEXT NOT NULL PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM agent_memory WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO agent_memory (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM agent_memory WHERE key = ?1", params![key])?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryKv
// ─────────────────────────────────────────────────────────────────────────────

/// Volatile [`KeyValueStore`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: HashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(kv: &mut dyn KeyValueStore) {
        assert_eq!(kv.get("missing").unwrap(), None);
        kv.set("trusted_contact", "5550100").unwrap();
        assert_eq!(kv.get("trusted_contact").unwrap().as_deref(), Some("5550100"));
        kv.set("trusted_contact", "5550199").unwrap();
        assert_eq!(kv.get("trusted_contact").unwrap().as_deref(), Some("5550199"));
        kv.remove("trusted_contact").unwrap();
        assert_eq!(kv.get("trusted_contact").unwrap(), None);
        // Removing twice is fine.
        kv.remove("trusted_contact").unwrap();
    }

    #[test]
    fn sqlite_kv_get_set_remove() {
        let mut kv = SqliteKv::open_in_memory().unwrap();
        exercise(&mut kv);
    }

    #[test]
    fn memory_kv_get_set_remove() {
        let mut kv = MemoryKv::new();
        exercise(&mut kv);
    }

    #[test]
    fn sqlite_kv_survives_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("lifeline.db");
        let path = path.to_string_lossy().to_string();

        {
            let mut kv = SqliteKv::open(&path).unwrap();
            kv.set("missed_count", "3").unwrap();
        }

        let kv = SqliteKv::open(&path).unwrap();
        assert_eq!(kv.get("missed_count").unwrap().as_deref(), Some("3"));
    }
}
