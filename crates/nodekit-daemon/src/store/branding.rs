//! Branding cache: SQLite table behind an in-process read index.
//!
//! Reads happen on the telephony callback thread and must be O(1) without
//! disk I/O, so the full table is mirrored into a `HashMap` at open and the
//! map is maintained on every committed write. Writes come only from the
//! sync engine, off the call path.

use std::collections::HashMap;
use std::sync::RwLock;

use nodekit_core::model::BrandingRecord;
use rusqlite::params;
use tracing::{debug, info};

use super::{SharedConnection, StoreError, lock_conn};

/// Local branding cache.
pub struct BrandingStore {
    conn: SharedConnection,
    /// In-process mirror of the `branding` table, keyed by E.164 number.
    /// Updated only after the corresponding transaction commits.
    index: RwLock<HashMap<String, BrandingRecord>>,
}

impl BrandingStore {
    /// Creates the store over an opened database, loading the read index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the initial table scan fails.
    pub fn new(conn: SharedConnection) -> Result<Self, StoreError> {
        let index = {
            let guard = lock_conn(&conn)?;
            let mut stmt = guard.prepare(
                "SELECT phoneE164, brandName, logoUrl, callReason, updatedAtEpochMs
                 FROM branding",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(BrandingRecord {
                    phone_e164: row.get(0)?,
                    brand_name: row.get(1)?,
                    logo_url: row.get(2)?,
                    call_reason: row.get(3)?,
                    updated_at_epoch_ms: row.get(4)?,
                })
            })?;
            let mut map = HashMap::new();
            for row in rows {
                let record = row?;
                map.insert(record.phone_e164.clone(), record);
            }
            map
        };

        if !index.is_empty() {
            debug!(records = index.len(), "Loaded branding index");
        }

        Ok(Self {
            conn,
            index: RwLock::new(index),
        })
    }

    /// Looks up the branding record for a normalized number.
    ///
    /// Served entirely from the in-process index; safe on the call path.
    /// A poisoned index lock degrades to a miss rather than an error; the
    /// caller is the fail-open gate.
    #[must_use]
    pub fn get(&self, phone_e164: &str) -> Option<BrandingRecord> {
        let index = self.index.read().ok()?;
        index.get(phone_e164).cloned()
    }

    /// Number of cached records (diagnostics).
    #[must_use]
    pub fn count(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    /// Inserts or replaces one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure; the index is untouched in
    /// that case.
    pub fn upsert(&self, record: BrandingRecord) -> Result<(), StoreError> {
        self.upsert_all(vec![record])
    }

    /// Inserts or replaces a batch of records in one transaction.
    ///
    /// All-or-nothing: if any row fails, the transaction rolls back and the
    /// read index is left unchanged, so a partially applied pull can never
    /// leave the cache inconsistent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on transaction failure.
    pub fn upsert_all(&self, records: Vec<BrandingRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        {
            let mut guard = lock_conn(&self.conn)?;
            let tx = guard.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO branding
                     (phoneE164, brandName, logoUrl, callReason, updatedAtEpochMs)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        record.phone_e164,
                        record.brand_name,
                        record.logo_url,
                        record.call_reason,
                        record.updated_at_epoch_ms,
                    ])?;
                }
            }
            tx.commit()?;
        }

        // Commit succeeded; now reflect the batch in the read index.
        let mut index = self
            .index
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let count = records.len();
        for record in records {
            index.insert(record.phone_e164.clone(), record);
        }
        debug!(records = count, "Upserted branding records");

        Ok(())
    }

    /// Deletes all records whose update timestamp is before `cutoff_ms` and
    /// returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn evict_older_than(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let deleted = {
            let guard = lock_conn(&self.conn)?;
            guard.execute(
                "DELETE FROM branding WHERE updatedAtEpochMs < ?1",
                params![cutoff_ms],
            )?
        };

        if deleted > 0 {
            let mut index = self
                .index
                .write()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            index.retain(|_, record| record.updated_at_epoch_ms >= cutoff_ms);
            info!(deleted, cutoff_ms, "Evicted stale branding records");
        }

        Ok(deleted)
    }

    /// Async wrapper for [`Self::upsert_all`] using `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on transaction failure or if the blocking
    /// task is cancelled.
    pub async fn upsert_all_async(
        self: &std::sync::Arc<Self>,
        records: Vec<BrandingRecord>,
    ) -> Result<(), StoreError> {
        let store = std::sync::Arc::clone(self);
        tokio::task::spawn_blocking(move || store.upsert_all(records))
            .await
            .map_err(|e| StoreError::Database(format!("spawn_blocking failed: {e}")))?
    }

    /// Async wrapper for [`Self::evict_older_than`] using `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure or if the blocking task is
    /// cancelled.
    pub async fn evict_older_than_async(
        self: &std::sync::Arc<Self>,
        cutoff_ms: i64,
    ) -> Result<usize, StoreError> {
        let store = std::sync::Arc::clone(self);
        tokio::task::spawn_blocking(move || store.evict_older_than(cutoff_ms))
            .await
            .map_err(|e| StoreError::Database(format!("spawn_blocking failed: {e}")))?
    }
}

impl std::fmt::Debug for BrandingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrandingStore")
            .field("records", &self.count())
            .finish_non_exhaustive()
    }
}
