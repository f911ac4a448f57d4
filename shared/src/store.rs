//! Keyed persistence for tasks and events
//!
//! The control plane treats persistence as an opaque key/value store with a
//! list operation. Records are keyed by canonical UUID string. Two
//! implementations are provided: an ephemeral in-memory map and a durable
//! SQLite-backed store holding serde-JSON values.
//!
//! No transactions are assumed; the control plane tolerates lost writes
//! across restarts because task state is re-reconciled from workers.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Keyed store consumed by the manager (task + event instances) and the
/// worker (task instance).
pub trait Store<T>: Send {
    /// Inserts or replaces the value under `key`.
    fn put(&mut self, key: &str, value: T) -> Result<()>;
    /// Returns the value under `key`, if present.
    fn get(&self, key: &str) -> Result<Option<T>>;
    /// Returns all stored values.
    fn list(&self) -> Result<Vec<T>>;
    /// Number of stored values.
    fn count(&self) -> Result<usize>;
}

/// Ephemeral store backed by a HashMap. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore<T> {
    items: HashMap<String, T>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T: Clone + Send> Store<T> for MemoryStore<T> {
    fn put(&mut self, key: &str, value: T) -> Result<()> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.items.get(key).cloned())
    }

    fn list(&self) -> Result<Vec<T>> {
        Ok(self.items.values().cloned().collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.items.len())
    }
}

/// Durable store holding JSON-encoded values in a single SQLite table.
///
/// The write semantics are at-least-once: `put` replaces the row under its
/// key, so re-applying an update is harmless.
pub struct SqliteStore<T> {
    conn: rusqlite::Connection,
    table: String,
    _marker: PhantomData<T>,
}

impl<T> SqliteStore<T> {
    /// Opens (or creates) the database at `path` and ensures `table` exists.
    ///
    /// `table` must be a plain identifier; it is interpolated into DDL/DML
    /// statements because SQLite cannot bind table names.
    pub fn open(path: &Path, table: &str, busy_timeout_seconds: u64) -> Result<Self> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("invalid store table name: {:?}", table);
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open store database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(busy_timeout_seconds))
            .context("Failed to set database busy timeout")?;
        tracing::debug!(path = %path.display(), table, "Opened store database");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            table
        ))
        .with_context(|| format!("Failed to create store table {}", table))?;

        Ok(Self {
            conn,
            table: table.to_string(),
            _marker: PhantomData,
        })
    }
}

impl<T: Serialize + DeserializeOwned + Send> Store<T> for SqliteStore<T> {
    fn put(&mut self, key: &str, value: T) -> Result<()> {
        let encoded = serde_json::to_string(&value).context("Failed to encode store value")?;
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                    self.table
                ),
                rusqlite::params![key, encoded],
            )
            .with_context(|| format!("Failed to write key {} to {}", key, self.table))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT value FROM {} WHERE key = ?1", self.table))?;
        let mut rows = stmt.query(rusqlite::params![key])?;

        match rows.next()? {
            Some(row) => {
                let encoded: String = row.get(0)?;
                let value = serde_json::from_str(&encoded)
                    .with_context(|| format!("Corrupt store value under key {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<T>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT value FROM {}", self.table))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for encoded in rows {
            let encoded = encoded?;
            values.push(serde_json::from_str(&encoded).context("Corrupt store value")?);
        }
        Ok(values)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
