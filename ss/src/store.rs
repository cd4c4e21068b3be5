//! Core Store implementation

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A raw stored record
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Result of an atomic read-modify-write
#[derive(Debug, Clone, PartialEq)]
pub struct Updated<T> {
    /// Value before the update (None if the key was absent)
    pub previous: Option<T>,
    /// Value written by the update
    pub current: T,
}

/// SQLite-backed key/value store
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a store at the given database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let store = Self::init(conn, Some(path))?;
        info!(path = ?store.path, "Opened state store");
        Ok(store)
    }

    /// Open a private in-memory store (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Store::open_in_memory: called");
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_millis(crate::DEFAULT_BUSY_TIMEOUT_MS))?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%mode, "Store::init: journal mode");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key        TEXT PRIMARY KEY NOT NULL,
                 value      TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn, path })
    }

    /// Database file backing this store (None when in memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read and deserialize a value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        debug!(%key, "Store::get: called");
        match read_value(&self.conn, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read a raw entry with its metadata
    pub fn get_entry(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        debug!(%key, "Store::get_entry: called");
        let row = self
            .conn
            .query_row(
                "SELECT key, value, updated_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;

        row.map(|(key, value, updated_at)| to_entry(key, &value, &updated_at))
            .transpose()
    }

    /// Serialize and write a value, replacing any previous one
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        debug!(%key, "Store::set: called");
        let raw = serde_json::to_string(value)?;
        write_value(&self.conn, key, &raw)?;
        Ok(())
    }

    /// Atomically read, transform and write a value
    ///
    /// `f` receives the current value (None if absent) and returns the new
    /// one. The whole operation runs in an immediate transaction; concurrent
    /// writers (threads or processes) wait on the database lock. If anything
    /// fails the transaction is rolled back and the record is unchanged.
    pub fn update<T, F>(&mut self, key: &str, f: F) -> Result<Updated<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce(Option<T>) -> T,
    {
        debug!(%key, "Store::update: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<T> = match read_value(&tx, key)? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        let current = f(previous.clone());
        let raw = serde_json::to_string(&current)?;
        write_value(&tx, key, &raw)?;
        tx.commit()?;

        debug!(%key, "Store::update: committed");
        Ok(Updated { previous, current })
    }

    /// Delete a key, returning whether it existed
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        debug!(%key, "Store::delete: called");
        let removed = self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// List all entries ordered by key
    pub fn list(&self) -> Result<Vec<Entry>, StoreError> {
        debug!("Store::list: called");
        let mut stmt = self.conn.prepare("SELECT key, value, updated_at FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, value, updated_at) = row?;
            entries.push(to_entry(key, &value, &updated_at)?);
        }
        Ok(entries)
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
}

fn write_value(conn: &Connection, key: &str, raw: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, raw, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn to_entry(key: String, value: &str, updated_at: &str) -> Result<Entry, StoreError> {
    let updated_at = DateTime::parse_from_rfc3339(updated_at)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default();
    Ok(Entry {
        key,
        value: serde_json::from_str(value)?,
        updated_at,
    })
}
