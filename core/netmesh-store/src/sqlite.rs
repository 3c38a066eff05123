//! SQLite-backed [`Store`].

use crate::{Store, StorageError, StorageResult, StoreValue};
use netmesh_types::now_millis;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Persistent [`Store`] backed by a single SQLite table.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened SQLite store at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS store (
                key TEXT PRIMARY KEY,
                encoding_id TEXT NOT NULL,
                time_created INTEGER NOT NULL,
                time_updated INTEGER NOT NULL,
                time_read INTEGER NOT NULL,
                time_expires INTEGER,
                data BLOB NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn created_time(conn: &Connection, key: &str) -> StorageResult<Option<u64>> {
        let created: Option<i64> = conn
            .query_row(
                "SELECT time_created FROM store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(created.map(|t| t as u64))
    }

    fn write(conn: &Connection, value: &StoreValue) -> StorageResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO store (key, encoding_id, time_created, time_updated, time_read, time_expires, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                value.key,
                value.encoding_id,
                value.time_created as i64,
                value.time_updated as i64,
                value.time_read as i64,
                value.time_expires.map(|t| t as i64),
                value.data,
            ],
        )?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn put(&self, value: StoreValue) -> StorageResult<()> {
        let conn = self.conn()?;
        if Self::created_time(&conn, &value.key)?.is_some() {
            return Err(StorageError::KeyExists(value.key));
        }
        Self::write(&conn, &value)
    }

    fn update(&self, mut value: StoreValue) -> StorageResult<()> {
        let conn = self.conn()?;
        match Self::created_time(&conn, &value.key)? {
            Some(created) => {
                value.time_created = created;
                Self::write(&conn, &value)
            }
            None => Err(StorageError::NotFound(value.key)),
        }
    }

    fn put_or_update(&self, mut value: StoreValue) -> StorageResult<bool> {
        let conn = self.conn()?;
        let existing = Self::created_time(&conn, &value.key)?;
        if let Some(created) = existing {
            value.time_created = created;
        }
        Self::write(&conn, &value)?;
        Ok(existing.is_some())
    }

    fn get(&self, key: &str) -> StorageResult<StoreValue> {
        let conn = self.conn()?;
        let now = now_millis();
        let value = conn
            .query_row(
                "SELECT key, encoding_id, time_created, time_updated, time_expires, data FROM store WHERE key = ?1",
                params![key],
                |row| {
                    let created: i64 = row.get(2)?;
                    let updated: i64 = row.get(3)?;
                    let expires: Option<i64> = row.get(4)?;
                    Ok(StoreValue {
                        key: row.get(0)?,
                        encoding_id: row.get(1)?,
                        time_created: created as u64,
                        time_updated: updated as u64,
                        time_read: now,
                        time_expires: expires.map(|t| t as u64),
                        data: row.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        conn.execute(
            "UPDATE store SET time_read = ?1 WHERE key = ?2",
            params![now as i64, key],
        )?;
        Ok(value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM store WHERE key = ?1", params![key])?;
        if removed == 0 {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    fn delete_all(&self, prefix: &str) -> StorageResult<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM store WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(removed)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}
