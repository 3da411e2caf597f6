//! Key/value blob persistence behind the measurement store.
//!
//! The store keeps its whole history in a single named blob, so a backend
//! only needs get/set/remove by key. `set` must replace the value in one
//! step: a reader sees either the old blob or the new one, never a mix.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::schema;

/// Durable storage for named text blobs.
pub trait BlobBackend: Send + Sync {
    /// Read a blob. `Ok(None)` if nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob under `key` atomically.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the blob under `key`. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-backed blob storage.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Backend("database connection lock poisoned".to_string()))
    }
}

impl BlobBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM blobs WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.conn()?.execute(
            "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        )?;
        debug!(key, bytes = value.len(), "blob written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM blobs WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// In-memory blob storage with failure injection, for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    /// An empty backend with no failures injected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `get` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `set` and `remove` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store `value` verbatim, bypassing any validation (e.g. to plant corrupt data).
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(key.to_string(), value.to_string());
        }
    }

    /// The raw blob under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.blobs.read().ok()?.get(key).cloned()
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::Backend(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::Backend("memory backend lock poisoned".to_string())
}

impl BlobBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check(&self.fail_reads, "read")?;
        Ok(self.blobs.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.blobs
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.blobs.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}
