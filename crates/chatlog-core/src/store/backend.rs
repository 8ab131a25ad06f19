//! Durable key-value backends for snapshots

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::Result;

/// Durable medium behind [`PersistenceAdapter`](super::PersistenceAdapter)
pub trait SnapshotBackend: Send + Sync {
    /// Write a value, replacing any previous one under the same key
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Read the value stored under `key`
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write several values as one unit. Backends with transactions should
    /// override this so that either all entries land or none do.
    fn write_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.write(key, value)?;
        }
        Ok(())
    }
}

/// SQLite-based snapshot backend
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) a backend at the given database path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening snapshot database at: {}", db_path.display());
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory backend (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SnapshotBackend for SqliteBackend {
    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn write_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        let updated_at = Utc::now().to_rfc3339();
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, updated_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }
}

/// Process-local backend, lost on exit
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotBackend for MemoryBackend {
    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn write_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_write_and_read() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.read("chatHistory").unwrap().is_none());

        backend.write("chatHistory", "[]").unwrap();
        backend.write("chatHistory", "[1]").unwrap();
        assert_eq!(backend.read("chatHistory").unwrap().as_deref(), Some("[1]"));
    }

    #[test]
    fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");

        {
            let backend = SqliteBackend::new(&path).unwrap();
            backend.write("lastSaved", "Never").unwrap();
        }

        let backend = SqliteBackend::new(&path).unwrap();
        assert_eq!(backend.read("lastSaved").unwrap().as_deref(), Some("Never"));
    }

    #[test]
    fn test_sqlite_write_many_is_atomic() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .write_many(&[("chatHistory", "[]"), ("lastSaved", "2025-01-01T00:00:00Z")])
            .unwrap();
        assert_eq!(backend.read("chatHistory").unwrap().as_deref(), Some("[]"));
        assert_eq!(
            backend.read("lastSaved").unwrap().as_deref(),
            Some("2025-01-01T00:00:00Z")
        );

        // Break the second insert; the first must roll back with it
        backend
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_marker BEFORE INSERT ON kv
                 WHEN NEW.key = 'lastSaved'
                 BEGIN SELECT RAISE(ABORT, 'marker rejected'); END;",
            )
            .unwrap();

        assert!(
            backend
                .write_many(&[("chatHistory", "[1]"), ("lastSaved", "later")])
                .is_err()
        );
        assert_eq!(backend.read("chatHistory").unwrap().as_deref(), Some("[]"));
        assert_eq!(
            backend.read("lastSaved").unwrap().as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_memory_backend() {
        let backend = MemoryBackend::new();
        backend.write("a", "1").unwrap();
        assert_eq!(backend.read("a").unwrap().as_deref(), Some("1"));
        assert!(backend.read("b").unwrap().is_none());
    }
}
