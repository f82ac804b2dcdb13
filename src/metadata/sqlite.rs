//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{MetadataStore, ObjectRecord, UpsertOutcome};
use crate::errors::SyncError;

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the objects table if it does not already exist.
    /// Idempotent -- safe to call on every run.
    fn init_db(&self) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS objects (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                key            TEXT NOT NULL UNIQUE,
                last_modified  TEXT NOT NULL,
                size           TEXT NOT NULL,
                etag           TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

// ── MetadataStore implementation ───────────────────────────────────

impl MetadataStore for SqliteMetadataStore {
    fn upsert(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM objects WHERE key = ?1",
                    params![record.key],
                    |row| row.get(0),
                )
                .optional()?;

            match id {
                Some(id) => {
                    conn.execute(
                        "UPDATE objects SET last_modified = ?2, size = ?3, etag = ?4 WHERE id = ?1",
                        params![id, record.last_modified, record.size, record.etag],
                    )?;
                    Ok(UpsertOutcome::Updated)
                }
                None => {
                    conn.execute(
                        "INSERT INTO objects (key, last_modified, size, etag) VALUES (?1, ?2, ?3, ?4)",
                        params![record.key, record.last_modified, record.size, record.etag],
                    )?;
                    Ok(UpsertOutcome::Inserted)
                }
            }
        })
    }

    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ObjectRecord>, SyncError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    "SELECT key, last_modified, size, etag FROM objects WHERE key = ?1",
                    params![key],
                    |row| {
                        Ok(ObjectRecord {
                            key: row.get(0)?,
                            last_modified: row.get(1)?,
                            size: row.get(2)?,
                            etag: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(result)
        })
    }

    fn count_objects(&self) -> Pin<Box<dyn Future<Output = Result<u64, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
