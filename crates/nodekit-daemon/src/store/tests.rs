//! Tests for the persistence layer: branding round-trips and eviction
//! exactness, outbox FIFO ordering, idempotent upload marking, retention
//! sweeps, and restart-safe persistence.

use nodekit_core::model::{BrandingRecord, EventOutcome, NewOutboxEvent};

use super::*;

// =============================================================================
// Test Helpers
// =============================================================================

fn record(number: &str, name: &str, updated_at: i64) -> BrandingRecord {
    BrandingRecord {
        phone_e164: number.to_string(),
        brand_name: Some(name.to_string()),
        logo_url: None,
        call_reason: None,
        updated_at_epoch_ms: updated_at,
    }
}

fn event(number: &str, outcome: EventOutcome, created_at: i64) -> NewOutboxEvent {
    NewOutboxEvent {
        phone_e164: number.to_string(),
        outcome,
        surface: Some("call_screen".to_string()),
        displayed_at_epoch_ms: Some(created_at),
        idempotency_key: Some(format!("key-{number}-{created_at}")),
        meta_json: None,
        created_at_epoch_ms: created_at,
    }
}

// =============================================================================
// Branding Store
// =============================================================================

#[test]
fn branding_upsert_get_round_trip() {
    let store = BrandingStore::new(open_in_memory().unwrap()).unwrap();

    let original = BrandingRecord {
        phone_e164: "+15551234567".to_string(),
        brand_name: Some("Acme Bank".to_string()),
        logo_url: Some("https://cdn.example.io/acme.png".to_string()),
        call_reason: Some("Fraud Alert".to_string()),
        updated_at_epoch_ms: 1_000,
    };
    store.upsert(original.clone()).unwrap();

    assert_eq!(store.get("+15551234567"), Some(original));
    assert_eq!(store.get("+15550000000"), None);
    assert_eq!(store.count(), 1);
}

#[test]
fn branding_upsert_replaces_on_conflict() {
    let store = BrandingStore::new(open_in_memory().unwrap()).unwrap();
    store.upsert(record("+15551234567", "Old Name", 1_000)).unwrap();
    store.upsert(record("+15551234567", "New Name", 2_000)).unwrap();

    assert_eq!(store.count(), 1);
    let got = store.get("+15551234567").unwrap();
    assert_eq!(got.brand_name.as_deref(), Some("New Name"));
    assert_eq!(got.updated_at_epoch_ms, 2_000);
}

#[test]
fn branding_eviction_is_exact() {
    let store = BrandingStore::new(open_in_memory().unwrap()).unwrap();
    store
        .upsert_all(vec![
            record("+15550000001", "Old", 100),
            record("+15550000002", "Boundary", 200),
            record("+15550000003", "Fresh", 300),
        ])
        .unwrap();

    // Strictly-less-than cutoff: the boundary record survives.
    let removed = store.evict_older_than(200).unwrap();
    assert_eq!(removed, 1);
    assert!(store.get("+15550000001").is_none());
    assert!(store.get("+15550000002").is_some());
    assert!(store.get("+15550000003").is_some());
    assert_eq!(store.count(), 2);
}

#[test]
fn branding_index_survives_reopen() {
    let db = tempfile::NamedTempFile::new().unwrap();

    {
        let store = BrandingStore::new(open_database(db.path()).unwrap()).unwrap();
        store.upsert(record("+15551234567", "Acme Bank", 1_000)).unwrap();
    }

    // Fresh connection and index, same file.
    let reopened = BrandingStore::new(open_database(db.path()).unwrap()).unwrap();
    assert_eq!(
        reopened.get("+15551234567").unwrap().brand_name.as_deref(),
        Some("Acme Bank")
    );
}

#[test]
fn branding_empty_batch_is_a_no_op() {
    let store = BrandingStore::new(open_in_memory().unwrap()).unwrap();
    store.upsert_all(Vec::new()).unwrap();
    assert_eq!(store.count(), 0);
}

#[test]
fn branding_failed_batch_rolls_back_table_and_index() {
    let conn = open_in_memory().unwrap();
    let store = BrandingStore::new(SharedConnection::clone(&conn)).unwrap();
    store.upsert(record("+15551234567", "Acme Bank", 1_000)).unwrap();

    // Cap the database at its current size so the next batch runs out of
    // pages mid-transaction (SQLITE_FULL).
    {
        let guard = lock_conn(&conn).unwrap();
        let pages: i64 = guard
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap();
        let _: i64 = guard
            .query_row(&format!("PRAGMA max_page_count = {pages}"), [], |row| {
                row.get(0)
            })
            .unwrap();
    }

    let oversized: Vec<BrandingRecord> = (0..512)
        .map(|i| record(&format!("+1555{i:07}"), &"x".repeat(1_000), i))
        .collect();
    assert!(store.upsert_all(oversized).is_err());

    // Nothing from the failed batch is visible, in the index or the table.
    assert_eq!(store.count(), 1);
    assert!(store.get("+15550000000").is_none());
    assert!(store.get("+15551234567").is_some());

    let rescanned = BrandingStore::new(conn).unwrap();
    assert_eq!(rescanned.count(), 1);
}

// =============================================================================
// Event Outbox
// =============================================================================

#[test]
fn outbox_append_then_pending_is_fifo() {
    let outbox = EventOutbox::new(open_in_memory().unwrap());

    let first = outbox.append(&event("+15550000001", EventOutcome::Shown, 10)).unwrap();
    let second = outbox
        .append(&event("+15550000002", EventOutcome::Suppressed, 20))
        .unwrap();
    let third = outbox.append(&event("+15550000003", EventOutcome::Error, 30)).unwrap();
    assert!(first < second && second < third);

    let pending = outbox.pending(10).unwrap();
    let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second, third]);

    // Bounded batch keeps FIFO order.
    let bounded = outbox.pending(2).unwrap();
    assert_eq!(bounded.len(), 2);
    assert_eq!(bounded[0].id, first);
    assert_eq!(bounded[1].id, second);
}

#[test]
fn outbox_round_trip_preserves_fields() {
    let outbox = EventOutbox::new(open_in_memory().unwrap());
    let new_event = NewOutboxEvent {
        phone_e164: "+15551234567".to_string(),
        outcome: EventOutcome::Shown,
        surface: Some("call_screen".to_string()),
        displayed_at_epoch_ms: Some(99),
        idempotency_key: Some("abc123".to_string()),
        meta_json: Some(r#"{"call_id":"c-1"}"#.to_string()),
        created_at_epoch_ms: 100,
    };
    let id = outbox.append(&new_event).unwrap();

    let got = outbox.pending(1).unwrap().remove(0);
    assert_eq!(got.id, id);
    assert_eq!(got.phone_e164, new_event.phone_e164);
    assert_eq!(got.outcome, EventOutcome::Shown);
    assert_eq!(got.surface, new_event.surface);
    assert_eq!(got.displayed_at_epoch_ms, Some(99));
    assert_eq!(got.idempotency_key, new_event.idempotency_key);
    assert_eq!(got.meta_json, new_event.meta_json);
    assert_eq!(got.created_at_epoch_ms, 100);
    assert!(!got.uploaded);
    assert_eq!(got.attempts, 0);
    assert_eq!(got.last_error, None);
}

#[test]
fn outbox_mark_uploaded_is_idempotent() {
    let outbox = EventOutbox::new(open_in_memory().unwrap());
    let id = outbox.append(&event("+15551234567", EventOutcome::Shown, 10)).unwrap();

    outbox.mark_uploaded(id).unwrap();
    assert_eq!(outbox.count_pending().unwrap(), 0);

    // Second call changes nothing.
    outbox.mark_uploaded(id).unwrap();
    assert_eq!(outbox.count_pending().unwrap(), 0);
    assert!(outbox.pending(10).unwrap().is_empty());
}

#[test]
fn outbox_record_failure_increments_attempts_only() {
    let outbox = EventOutbox::new(open_in_memory().unwrap());
    let id = outbox.append(&event("+15551234567", EventOutcome::Shown, 10)).unwrap();

    outbox.record_failure(id, "network error: timeout").unwrap();
    outbox.record_failure(id, "service error: 503").unwrap();

    let got = outbox.pending(1).unwrap().remove(0);
    assert_eq!(got.attempts, 2);
    assert_eq!(got.last_error.as_deref(), Some("service error: 503"));
    assert!(!got.uploaded);
}

#[test]
fn outbox_retention_sweep_is_exact() {
    let outbox = EventOutbox::new(open_in_memory().unwrap());

    let old_uploaded = outbox.append(&event("+15550000001", EventOutcome::Shown, 100)).unwrap();
    let old_pending = outbox.append(&event("+15550000002", EventOutcome::Shown, 100)).unwrap();
    let fresh_uploaded = outbox.append(&event("+15550000003", EventOutcome::Shown, 300)).unwrap();
    outbox.mark_uploaded(old_uploaded).unwrap();
    outbox.mark_uploaded(fresh_uploaded).unwrap();

    // Only uploaded AND created before the cutoff is removed.
    let deleted = outbox.delete_uploaded_older_than(200).unwrap();
    assert_eq!(deleted, 1);

    // The old pending event survived: pending rows are never swept.
    let remaining = outbox.pending(10).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, old_pending);
}

#[test]
fn outbox_count_pending_tracks_state() {
    let outbox = EventOutbox::new(open_in_memory().unwrap());
    assert_eq!(outbox.count_pending().unwrap(), 0);

    let a = outbox.append(&event("+15550000001", EventOutcome::Shown, 10)).unwrap();
    outbox.append(&event("+15550000002", EventOutcome::Test, 20)).unwrap();
    assert_eq!(outbox.count_pending().unwrap(), 2);

    outbox.mark_uploaded(a).unwrap();
    assert_eq!(outbox.count_pending().unwrap(), 1);
}

#[test]
fn outbox_state_survives_reopen() {
    let db = tempfile::NamedTempFile::new().unwrap();

    let (uploaded_id, pending_id) = {
        let outbox = EventOutbox::new(open_database(db.path()).unwrap());
        let uploaded = outbox.append(&event("+15550000001", EventOutcome::Shown, 10)).unwrap();
        let pending = outbox.append(&event("+15550000002", EventOutcome::Error, 20)).unwrap();
        outbox.mark_uploaded(uploaded).unwrap();
        outbox.record_failure(pending, "network error: offline").unwrap();
        (uploaded, pending)
    };

    let reopened = EventOutbox::new(open_database(db.path()).unwrap());
    let pending = reopened.pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, pending_id);
    assert_eq!(pending[0].attempts, 1);
    assert_ne!(pending[0].id, uploaded_id);
}

// =============================================================================
// Cross-store independence
// =============================================================================

#[test]
fn stores_share_one_database_without_interference() {
    let conn = open_in_memory().unwrap();
    let store = BrandingStore::new(SharedConnection::clone(&conn)).unwrap();
    let outbox = EventOutbox::new(conn);

    store.upsert(record("+15551234567", "Acme Bank", 1_000)).unwrap();
    outbox.append(&event("+15551234567", EventOutcome::Shown, 1_000)).unwrap();

    assert_eq!(store.count(), 1);
    assert_eq!(outbox.count_pending().unwrap(), 1);

    // Sweeping one store leaves the other untouched.
    store.evict_older_than(i64::MAX).unwrap();
    assert_eq!(store.count(), 0);
    assert_eq!(outbox.count_pending().unwrap(), 1);
}
