//! Event outbox: durable FIFO queue of branding-display events.
//!
//! `pending` returns uploaded=false rows in ascending id order so delivery
//! preserves call chronology; `mark_uploaded` is idempotent so a retried
//! delivery after a partial failure (network ok, local mark failed) cannot
//! corrupt state.

use std::sync::Arc;

use nodekit_core::model::{EventOutcome, NewOutboxEvent, OutboxEvent};
use rusqlite::{Row, params};
use tracing::{debug, info};

use super::{SharedConnection, StoreError, lock_conn};

/// Durable queue of branding-display events awaiting upload.
pub struct EventOutbox {
    conn: SharedConnection,
}

impl EventOutbox {
    /// Creates the outbox over an opened database.
    #[must_use]
    pub const fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Appends one event and returns its assigned id.
    ///
    /// The id is assigned by SQLite's autoincrement and is immutable from
    /// then on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure. Callers on the real-time
    /// path must swallow this error (fail-open); background callers
    /// propagate it.
    pub fn append(&self, event: &NewOutboxEvent) -> Result<i64, StoreError> {
        let guard = lock_conn(&self.conn)?;
        guard.execute(
            "INSERT INTO events
             (phoneE164, outcome, surface, displayedAtEpochMs, idempotencyKey,
              metaJson, createdAtEpochMs, uploaded, attempts, lastError)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, NULL)",
            params![
                event.phone_e164,
                event.outcome.as_str(),
                event.surface,
                event.displayed_at_epoch_ms,
                event.idempotency_key,
                event.meta_json,
                event.created_at_epoch_ms,
            ],
        )?;
        let id = guard.last_insert_rowid();
        debug!(id, outcome = %event.outcome, "Appended outbox event");
        Ok(id)
    }

    /// Marks an event uploaded. Idempotent: marking an already-uploaded
    /// event changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn mark_uploaded(&self, id: i64) -> Result<(), StoreError> {
        let guard = lock_conn(&self.conn)?;
        guard.execute("UPDATE events SET uploaded = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Records a failed delivery attempt: increments `attempts` and stores
    /// the error text. Never touches the uploaded flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn record_failure(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let guard = lock_conn(&self.conn)?;
        guard.execute(
            "UPDATE events SET attempts = attempts + 1, lastError = ?2 WHERE id = ?1",
            params![id, error],
        )?;
        Ok(())
    }

    /// Returns up to `limit` pending events in FIFO order (ascending id).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure or a corrupt outcome column.
    #[allow(clippy::cast_possible_wrap)]
    pub fn pending(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let guard = lock_conn(&self.conn)?;
        let mut stmt = guard.prepare(
            "SELECT id, phoneE164, outcome, surface, displayedAtEpochMs,
                    idempotencyKey, metaJson, createdAtEpochMs, uploaded,
                    attempts, lastError
             FROM events
             WHERE uploaded = 0
             ORDER BY id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row??);
        }
        Ok(events)
    }

    /// Number of pending (uploaded=false) events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    #[allow(clippy::cast_sign_loss)]
    pub fn count_pending(&self) -> Result<usize, StoreError> {
        let guard = lock_conn(&self.conn)?;
        let count: i64 = guard.query_row(
            "SELECT COUNT(*) FROM events WHERE uploaded = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Deletes exactly the events with uploaded=true and a creation time
    /// before `cutoff_ms`; returns the count removed. Pending events are
    /// never touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn delete_uploaded_older_than(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let guard = lock_conn(&self.conn)?;
        let deleted = guard.execute(
            "DELETE FROM events WHERE uploaded = 1 AND createdAtEpochMs < ?1",
            params![cutoff_ms],
        )?;
        if deleted > 0 {
            info!(deleted, cutoff_ms, "Pruned uploaded outbox events");
        }
        Ok(deleted)
    }

    /// Async wrapper for [`Self::pending`] using `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure or if the blocking task is
    /// cancelled.
    pub async fn pending_async(
        self: &Arc<Self>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let outbox = Arc::clone(self);
        tokio::task::spawn_blocking(move || outbox.pending(limit))
            .await
            .map_err(|e| StoreError::Database(format!("spawn_blocking failed: {e}")))?
    }

    /// Async wrapper for [`Self::delete_uploaded_older_than`] using
    /// `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure or if the blocking task is
    /// cancelled.
    pub async fn delete_uploaded_older_than_async(
        self: &Arc<Self>,
        cutoff_ms: i64,
    ) -> Result<usize, StoreError> {
        let outbox = Arc::clone(self);
        tokio::task::spawn_blocking(move || outbox.delete_uploaded_older_than(cutoff_ms))
            .await
            .map_err(|e| StoreError::Database(format!("spawn_blocking failed: {e}")))?
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Result<OutboxEvent, StoreError>> {
    let outcome_raw: String = row.get(2)?;
    let outcome = match EventOutcome::parse(&outcome_raw) {
        Ok(outcome) => outcome,
        Err(e) => return Ok(Err(StoreError::CorruptRow(e.to_string()))),
    };
    let uploaded: i64 = row.get(8)?;
    let attempts: i64 = row.get(9)?;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    Ok(Ok(OutboxEvent {
        id: row.get(0)?,
        phone_e164: row.get(1)?,
        outcome,
        surface: row.get(3)?,
        displayed_at_epoch_ms: row.get(4)?,
        idempotency_key: row.get(5)?,
        meta_json: row.get(6)?,
        created_at_epoch_ms: row.get(7)?,
        uploaded: uploaded != 0,
        attempts: attempts.max(0) as u32,
        last_error: row.get(10)?,
    }))
}

impl std::fmt::Debug for EventOutbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventOutbox")
            .field("pending", &self.count_pending().unwrap_or(0))
            .finish_non_exhaustive()
    }
}
