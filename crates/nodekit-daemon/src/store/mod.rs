//! Durable device-local persistence: branding cache and event outbox.
//!
//! Both stores share one SQLite database (WAL mode) and the exact two-table
//! schema the runtime is contracted to:
//!
//! ```text
//! branding(phoneE164 PK, brandName, logoUrl, callReason, updatedAtEpochMs)
//! events(id PK autoincrement, phoneE164, outcome, surface,
//!        displayedAtEpochMs, idempotencyKey, metaJson, createdAtEpochMs,
//!        uploaded, attempts, lastError)
//! ```
//!
//! # Invariants
//!
//! - Branding reads on the call path are served from an in-process index;
//!   they never touch disk or network.
//! - Batch branding writes are transactional: a partially failed pull never
//!   leaves the cache inconsistent.
//! - Event ids are assigned once by SQLite and never reused; `uploaded`
//!   transitions only pending -> uploaded; `attempts` is non-decreasing.
//! - Uploaded events are deleted only by the retention sweep; pending events
//!   are never deleted by sweeps.

mod branding;
mod outbox;
#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Mutex};

pub use branding::BrandingStore;
pub use outbox::EventOutbox;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Schema SQL for both stores.
const SCHEMA_SQL: &str = r"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS branding (
        phoneE164 TEXT PRIMARY KEY,
        brandName TEXT,
        logoUrl TEXT,
        callReason TEXT,
        updatedAtEpochMs INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_branding_updated ON branding(updatedAtEpochMs);

    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        phoneE164 TEXT NOT NULL,
        outcome TEXT NOT NULL,
        surface TEXT,
        displayedAtEpochMs INTEGER,
        idempotencyKey TEXT,
        metaJson TEXT,
        createdAtEpochMs INTEGER NOT NULL,
        uploaded INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        lastError TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_events_pending ON events(uploaded, id);
    CREATE INDEX IF NOT EXISTS idx_events_created ON events(createdAtEpochMs);
";

/// Errors from the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(String),

    /// Connection mutex poisoned by a panicked writer.
    #[error("database lock poisoned: {0}")]
    LockPoisoned(String),

    /// A row held an outcome string no longer recognized.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Shared SQLite connection handle.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Opens (or creates) the database at `path` and applies the schema.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the file cannot be opened or the
/// schema cannot be applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<SharedConnection, StoreError> {
    let conn = Connection::open_with_flags(
        path.as_ref(),
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Opens an in-memory database with the schema applied (tests, ephemeral
/// hosts).
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the schema cannot be applied.
pub fn open_in_memory() -> Result<SharedConnection, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Locks a shared connection, mapping poisoning to a store error.
pub(crate) fn lock_conn(
    conn: &SharedConnection,
) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|e| StoreError::LockPoisoned(e.to_string()))
}
