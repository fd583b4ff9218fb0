//! The reconciliation pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use nodekit_core::config::NodeKitConfig;
use nodekit_core::phone::normalize_e164;
use tracing::{debug, info, warn};

use super::transport::{BrandingTransport, DeviceInfo, SyncError};
use crate::clock::SharedClock;
use crate::store::{BrandingStore, EventOutbox};

/// Sentinel meaning no successful pull has happened yet.
const NEVER_PULLED: i64 = -1;

/// Outcome summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Branding records pulled and upserted.
    pub records_pulled: usize,
    /// Events delivered and marked uploaded.
    pub events_uploaded: usize,
    /// Events whose delivery failed this pass.
    pub events_failed: usize,
    /// Branding records removed by the eviction sweep.
    pub branding_evicted: usize,
    /// Uploaded events removed by the retention sweep.
    pub events_pruned: usize,
    /// Set when the pull stage failed; the cache kept its previous state.
    pub pull_error: Option<String>,
}

impl SyncReport {
    /// Whether the pull stage succeeded.
    #[must_use]
    pub const fn pull_ok(&self) -> bool {
        self.pull_error.is_none()
    }
}

/// Runs the pull / drain / sweep cycle against the local stores.
///
/// Passes are serialized: a pass requested while another is in flight waits
/// for it rather than running concurrently. Invoking a pass is always safe;
/// with no network every stage degrades to a no-op and the stores keep
/// their last-committed state.
pub struct SyncEngine {
    branding: Arc<BrandingStore>,
    outbox: Arc<EventOutbox>,
    transport: Arc<dyn BrandingTransport>,
    clock: SharedClock,
    config: NodeKitConfig,
    /// Epoch ms of the last successful pull; `NEVER_PULLED` before the
    /// first one. Used as the incremental `since` cursor.
    last_pull_ms: AtomicI64,
    run_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        branding: Arc<BrandingStore>,
        outbox: Arc<EventOutbox>,
        transport: Arc<dyn BrandingTransport>,
        clock: SharedClock,
        config: NodeKitConfig,
    ) -> Self {
        Self {
            branding,
            outbox,
            transport,
            clock,
            config,
            last_pull_ms: AtomicI64::new(NEVER_PULLED),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs one full pass: pull, drain, sweeps, device heartbeat.
    ///
    /// Never fails the caller: stage failures are captured in the report
    /// (pull) or recorded per event (drain) or logged (sweeps, heartbeat).
    pub async fn run_once(self: &Arc<Self>) -> SyncReport {
        let _guard = self.run_lock.lock().await;
        let mut report = SyncReport::default();

        self.pull(&mut report).await;
        self.drain(&mut report).await;
        self.sweep(&mut report).await;
        self.heartbeat().await;

        info!(
            pulled = report.records_pulled,
            uploaded = report.events_uploaded,
            failed = report.events_failed,
            evicted = report.branding_evicted,
            pruned = report.events_pruned,
            pull_ok = report.pull_ok(),
            "Sync pass finished"
        );
        report
    }

    /// Pulls fresh branding into the cache. A failure leaves the cache at
    /// its last-known-good state and is reported, not propagated.
    async fn pull(self: &Arc<Self>, report: &mut SyncReport) {
        let since = match self.last_pull_ms.load(Ordering::SeqCst) {
            NEVER_PULLED => None,
            ms => Some(ms),
        };
        let started_at = self.clock.now_epoch_ms();

        let records = match self.transport.fetch_branding(since).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Branding pull failed; keeping cached state");
                report.pull_error = Some(e.to_string());
                return;
            }
        };

        // Normalize keys and drop records with unusable numbers.
        let mut normalized = Vec::with_capacity(records.len());
        for mut record in records {
            match normalize_e164(&record.phone_e164) {
                Ok(number) => {
                    record.phone_e164 = number;
                    normalized.push(record);
                }
                Err(e) => {
                    debug!(error = %e, "Skipping branding record with bad number");
                }
            }
        }

        let count = normalized.len();
        match self.branding.upsert_all_async(normalized).await {
            Ok(()) => {
                report.records_pulled = count;
                self.last_pull_ms.store(started_at, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(error = %e, "Branding upsert failed; cache unchanged");
                report.pull_error = Some(e.to_string());
            }
        }
    }

    /// Delivers pending events, one at a time, each with an independent
    /// outcome. An authentication failure aborts the rest of the batch
    /// since every remaining delivery would fail identically.
    async fn drain(self: &Arc<Self>, report: &mut SyncReport) {
        let pending = match self.outbox.pending_async(self.config.upload_batch_size).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not read pending events");
                return;
            }
        };

        for event in pending {
            match self.transport.upload_event(&event).await {
                Ok(()) => {
                    if let Err(e) = self.outbox.mark_uploaded(event.id) {
                        // The service has the event (and its idempotency
                        // key); the retried delivery next pass is deduped.
                        warn!(id = event.id, error = %e, "Failed to mark event uploaded");
                        report.events_failed += 1;
                    } else {
                        report.events_uploaded += 1;
                    }
                }
                Err(e) => {
                    report.events_failed += 1;
                    if let Err(store_err) = self.outbox.record_failure(event.id, &e.to_string()) {
                        warn!(id = event.id, error = %store_err, "Failed to record attempt");
                    }
                    if matches!(e, SyncError::Unauthorized) {
                        warn!("Authentication failed; aborting remaining uploads");
                        break;
                    }
                    debug!(id = event.id, error = %e, "Event delivery failed; will retry");
                }
            }
        }
    }

    /// Retention sweeps on both stores. Failures are logged; the next pass
    /// retries them.
    #[allow(clippy::cast_possible_wrap)]
    async fn sweep(self: &Arc<Self>, report: &mut SyncReport) {
        let now_ms = self.clock.now_epoch_ms();

        let branding_cutoff = now_ms.saturating_sub(self.config.cache_retention_ms as i64);
        match self.branding.evict_older_than_async(branding_cutoff).await {
            Ok(evicted) => report.branding_evicted = evicted,
            Err(e) => warn!(error = %e, "Branding eviction sweep failed"),
        }

        let outbox_cutoff = now_ms.saturating_sub(self.config.outbox_retention_ms as i64);
        match self
            .outbox
            .delete_uploaded_older_than_async(outbox_cutoff)
            .await
        {
            Ok(pruned) => report.events_pruned = pruned,
            Err(e) => warn!(error = %e, "Outbox retention sweep failed"),
        }
    }

    /// Best-effort device heartbeat.
    async fn heartbeat(self: &Arc<Self>) {
        let Some(device_id) = self.config.device_id.clone() else {
            return;
        };
        let device = DeviceInfo {
            device_id,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(e) = self.transport.register_device(&device).await {
            debug!(error = %e, "Device heartbeat failed");
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("last_pull_ms", &self.last_pull_ms.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
