//! Sync engine tests against a scripted mock transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodekit_core::config::NodeKitConfig;
use nodekit_core::model::{BrandingRecord, EventOutcome, NewOutboxEvent, OutboxEvent};

use super::*;
use crate::clock::test_support::ManualClock;
use crate::store::{BrandingStore, EventOutbox, open_in_memory};

const NOW_MS: i64 = 10_000_000_000;

// =============================================================================
// Mock transport
// =============================================================================

/// Per-call scripted behavior for uploads.
#[derive(Debug, Clone)]
enum UploadScript {
    Accept,
    Network,
    Unauthorized,
}

#[derive(Default)]
struct MockTransport {
    fetch_result: Mutex<Option<Result<Vec<BrandingRecord>, SyncError>>>,
    upload_script: Mutex<Vec<UploadScript>>,
    fetch_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    uploaded_ids: Mutex<Vec<i64>>,
    register_calls: AtomicUsize,
}

impl MockTransport {
    fn returning_records(records: Vec<BrandingRecord>) -> Self {
        let mock = Self::default();
        *mock.fetch_result.lock().unwrap() = Some(Ok(records));
        mock
    }

    fn unreachable() -> Self {
        let mock = Self::default();
        *mock.fetch_result.lock().unwrap() =
            Some(Err(SyncError::Network("connection refused".to_string())));
        mock
    }

    fn with_upload_script(self, script: Vec<UploadScript>) -> Self {
        *self.upload_script.lock().unwrap() = script;
        self
    }
}

#[async_trait]
impl BrandingTransport for MockTransport {
    async fn fetch_branding(&self, _since: Option<i64>) -> Result<Vec<BrandingRecord>, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetch_result.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    async fn upload_event(&self, event: &OutboxEvent) -> Result<(), SyncError> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.upload_script.lock().unwrap();
        let step = script.get(call).cloned().unwrap_or(UploadScript::Accept);
        drop(script);
        match step {
            UploadScript::Accept => {
                self.uploaded_ids.lock().unwrap().push(event.id);
                Ok(())
            }
            UploadScript::Network => Err(SyncError::Network("connection refused".to_string())),
            UploadScript::Unauthorized => Err(SyncError::Unauthorized),
        }
    }

    async fn register_device(&self, _device: &DeviceInfo) -> Result<(), SyncError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

struct Fixture {
    engine: Arc<SyncEngine>,
    branding: Arc<BrandingStore>,
    outbox: Arc<EventOutbox>,
    transport: Arc<MockTransport>,
}

fn fixture(transport: MockTransport) -> Fixture {
    fixture_with_config(
        transport,
        NodeKitConfig::new("https://calls.example.io/api").unwrap(),
    )
}

fn fixture_with_config(transport: MockTransport, config: NodeKitConfig) -> Fixture {
    let conn = open_in_memory().unwrap();
    let branding = Arc::new(BrandingStore::new(Arc::clone(&conn)).unwrap());
    let outbox = Arc::new(EventOutbox::new(conn));
    let transport = Arc::new(transport);
    let clock = Arc::new(ManualClock::at(NOW_MS));
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&branding),
        Arc::clone(&outbox),
        Arc::clone(&transport) as Arc<dyn BrandingTransport>,
        clock,
        config,
    ));
    Fixture {
        engine,
        branding,
        outbox,
        transport,
    }
}

fn record(number: &str, name: &str, updated_at: i64) -> BrandingRecord {
    BrandingRecord {
        phone_e164: number.to_string(),
        brand_name: Some(name.to_string()),
        logo_url: None,
        call_reason: None,
        updated_at_epoch_ms: updated_at,
    }
}

fn pending_event(outbox: &EventOutbox, number: &str, created_at: i64) -> i64 {
    outbox
        .append(&NewOutboxEvent {
            phone_e164: number.to_string(),
            outcome: EventOutcome::Shown,
            surface: Some("call_screen".to_string()),
            displayed_at_epoch_ms: Some(created_at),
            idempotency_key: Some(format!("key-{number}")),
            meta_json: None,
            created_at_epoch_ms: created_at,
        })
        .unwrap()
}

// =============================================================================
// Pull stage
// =============================================================================

#[tokio::test]
async fn pull_upserts_fetched_records() {
    let fx = fixture(MockTransport::returning_records(vec![
        record("+15551234567", "Acme Bank", NOW_MS),
        record("+15557654321", "Globex", NOW_MS),
    ]));

    let report = fx.engine.run_once().await;

    assert!(report.pull_ok());
    assert_eq!(report.records_pulled, 2);
    assert_eq!(fx.branding.count(), 2);
    assert_eq!(
        fx.branding.get("+15551234567").unwrap().brand_name.as_deref(),
        Some("Acme Bank")
    );
}

#[tokio::test]
async fn pull_normalizes_numbers_and_skips_unusable_ones() {
    let fx = fixture(MockTransport::returning_records(vec![
        record("+1 (555) 123-4567", "Acme Bank", NOW_MS),
        record("", "Blank Number Co", NOW_MS),
        record("not-a-number", "Bad Number Co", NOW_MS),
    ]));

    let report = fx.engine.run_once().await;

    assert_eq!(report.records_pulled, 1);
    assert!(fx.branding.get("+15551234567").is_some());
    assert_eq!(fx.branding.count(), 1);
}

#[tokio::test]
async fn failed_pull_keeps_last_known_good_cache() {
    let fx = fixture(MockTransport::unreachable());
    fx.branding
        .upsert(record("+15551234567", "Acme Bank", NOW_MS - 1_000))
        .unwrap();

    let report = fx.engine.run_once().await;

    assert!(!report.pull_ok());
    assert_eq!(report.records_pulled, 0);
    assert_eq!(
        fx.branding.get("+15551234567").unwrap().brand_name.as_deref(),
        Some("Acme Bank")
    );
}

// =============================================================================
// Drain stage
// =============================================================================

#[tokio::test]
async fn drain_uploads_and_marks_in_fifo_order() {
    let fx = fixture(MockTransport::default());
    let first = pending_event(&fx.outbox, "+15550000001", NOW_MS - 100);
    let second = pending_event(&fx.outbox, "+15550000002", NOW_MS - 50);

    let report = fx.engine.run_once().await;

    assert_eq!(report.events_uploaded, 2);
    assert_eq!(report.events_failed, 0);
    assert_eq!(fx.outbox.count_pending().unwrap(), 0);
    assert_eq!(*fx.transport.uploaded_ids.lock().unwrap(), vec![first, second]);
}

#[tokio::test]
async fn unreachable_service_increments_attempts_exactly_once() {
    let fx = fixture(
        MockTransport::unreachable()
            .with_upload_script(vec![UploadScript::Network, UploadScript::Network]),
    );
    pending_event(&fx.outbox, "+15550000001", NOW_MS - 100);
    pending_event(&fx.outbox, "+15550000002", NOW_MS - 50);

    let report = fx.engine.run_once().await;

    assert_eq!(report.events_uploaded, 0);
    assert_eq!(report.events_failed, 2);

    let still_pending = fx.outbox.pending(10).unwrap();
    assert_eq!(still_pending.len(), 2);
    for event in &still_pending {
        assert_eq!(event.attempts, 1);
        assert!(event.last_error.as_deref().unwrap().contains("network"));
    }
}

#[tokio::test]
async fn one_failed_delivery_does_not_block_the_rest() {
    let fx = fixture(MockTransport::default().with_upload_script(vec![
        UploadScript::Network,
        UploadScript::Accept,
    ]));
    let first = pending_event(&fx.outbox, "+15550000001", NOW_MS - 100);
    let second = pending_event(&fx.outbox, "+15550000002", NOW_MS - 50);

    let report = fx.engine.run_once().await;

    assert_eq!(report.events_uploaded, 1);
    assert_eq!(report.events_failed, 1);

    let still_pending = fx.outbox.pending(10).unwrap();
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].id, first);
    assert_eq!(*fx.transport.uploaded_ids.lock().unwrap(), vec![second]);
}

#[tokio::test]
async fn auth_failure_aborts_the_remaining_batch() {
    let fx = fixture(MockTransport::default().with_upload_script(vec![
        UploadScript::Unauthorized,
        UploadScript::Accept,
    ]));
    pending_event(&fx.outbox, "+15550000001", NOW_MS - 100);
    pending_event(&fx.outbox, "+15550000002", NOW_MS - 50);

    let report = fx.engine.run_once().await;

    // Only the first delivery was attempted.
    assert_eq!(fx.transport.upload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.events_failed, 1);

    let still_pending = fx.outbox.pending(10).unwrap();
    assert_eq!(still_pending.len(), 2);
    assert_eq!(still_pending[0].attempts, 1);
    assert_eq!(still_pending[1].attempts, 0);
}

#[tokio::test]
async fn drain_respects_the_batch_limit() {
    let config = NodeKitConfig::new("https://calls.example.io/api")
        .unwrap()
        .with_upload_batch_size(2);
    let fx = fixture_with_config(MockTransport::default(), config);
    for i in 0..5 {
        pending_event(&fx.outbox, &format!("+1555000000{i}"), NOW_MS - 100 + i);
    }

    let report = fx.engine.run_once().await;

    assert_eq!(report.events_uploaded, 2);
    assert_eq!(fx.outbox.count_pending().unwrap(), 3);
}

// =============================================================================
// Sweeps and heartbeat
// =============================================================================

#[tokio::test]
async fn sweeps_prune_exactly_the_expired_rows() {
    let config = NodeKitConfig::new("https://calls.example.io/api")
        .unwrap()
        .with_cache_retention_ms(1_000)
        .with_outbox_retention_ms(1_000);
    // The one pending event fails delivery, so it stays pending through
    // the sweep.
    let fx = fixture_with_config(
        MockTransport::default().with_upload_script(vec![UploadScript::Network]),
        config,
    );

    fx.branding
        .upsert(record("+15550000001", "Expired", NOW_MS - 2_000))
        .unwrap();
    fx.branding
        .upsert(record("+15550000002", "Fresh", NOW_MS))
        .unwrap();

    let old_uploaded = pending_event(&fx.outbox, "+15550000001", NOW_MS - 2_000);
    fx.outbox.mark_uploaded(old_uploaded).unwrap();
    let old_pending = pending_event(&fx.outbox, "+15550000003", NOW_MS - 2_000);

    let report = fx.engine.run_once().await;

    assert_eq!(report.branding_evicted, 1);
    assert!(fx.branding.get("+15550000001").is_none());
    assert!(fx.branding.get("+15550000002").is_some());

    // Only the uploaded-and-old row is pruned; the old pending event
    // survives for retry.
    assert_eq!(report.events_pruned, 1);
    let still_pending = fx.outbox.pending(10).unwrap();
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].id, old_pending);
}

#[tokio::test]
async fn heartbeat_sent_only_with_a_device_id() {
    let fx = fixture(MockTransport::default());
    fx.engine.run_once().await;
    assert_eq!(fx.transport.register_calls.load(Ordering::SeqCst), 0);

    let config = NodeKitConfig::new("https://calls.example.io/api")
        .unwrap()
        .with_device_id("device-42")
        .unwrap();
    let fx = fixture_with_config(MockTransport::default(), config);
    fx.engine.run_once().await;
    assert_eq!(fx.transport.register_calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Degraded whole-pass behavior
// =============================================================================

#[tokio::test]
async fn empty_pass_is_a_safe_no_op() {
    let fx = fixture(MockTransport::default());
    let report = fx.engine.run_once().await;

    assert_eq!(report, SyncReport {
        records_pulled: 0,
        events_uploaded: 0,
        events_failed: 0,
        branding_evicted: 0,
        events_pruned: 0,
        pull_error: None,
    });
}
