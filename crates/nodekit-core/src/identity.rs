//! Stable device identity and per-event idempotency keys.
//!
//! The remote service deduplicates retried event deliveries by idempotency
//! key, so the key must be stable across process restarts for the same
//! logical event: it is derived from the device id, phone number, outcome,
//! and display timestamp rather than from any in-memory state.

use sha2::{Digest, Sha256};

use crate::model::EventOutcome;

/// Length in hex characters of a derived device id.
const DEVICE_ID_HEX_LEN: usize = 32;

/// Length in hex characters of a derived idempotency key.
const IDEMPOTENCY_KEY_HEX_LEN: usize = 40;

/// Derives a stable device identifier from an installation seed.
///
/// The seed should be stable for the installation (package name plus
/// platform installation id, or equivalent). The result is the first 32 hex
/// characters of `sha256(seed)`.
#[must_use]
pub fn derive_device_id(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(DEVICE_ID_HEX_LEN);
    hex
}

/// Derives the deduplication key for one branding-display event.
///
/// Stable for a given `(device, phone, outcome, displayed_at)` tuple: a
/// retried delivery after a partial failure (network succeeded, local
/// mark-uploaded failed) carries the same key and is discarded server-side.
#[must_use]
pub fn idempotency_key(
    device_id: &str,
    phone_e164: &str,
    outcome: EventOutcome,
    displayed_at_epoch_ms: i64,
) -> String {
    let seed = format!(
        "{device_id}|{phone_e164}|{}|{displayed_at_epoch_ms}",
        outcome.as_str()
    );
    let digest = Sha256::digest(seed.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(IDEMPOTENCY_KEY_HEX_LEN);
    hex
}
