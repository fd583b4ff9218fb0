//! Branding and outbox data model.
//!
//! Two records dominate the runtime: [`BrandingRecord`], the cached caller
//! metadata keyed by E.164 number, and [`OutboxEvent`], the durable record
//! of one branding-display decision awaiting upload. Both mirror the local
//! persistence schema column for column.
//!
//! # Invariants
//!
//! - At most one `BrandingRecord` per phone number; a record older than the
//!   staleness window must not be trusted for display.
//! - An `OutboxEvent` id is assigned once by the store and never changes;
//!   `uploaded` transitions only pending -> uploaded; `attempts` is
//!   non-decreasing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for string fields accepted from callers or the remote
/// service. Prevents unbounded input consumption when handling untrusted
/// payloads.
pub const MAX_STRING_LENGTH: usize = 1024;

/// Validates that a string field does not exceed the maximum allowed length.
///
/// # Errors
///
/// Returns [`ModelError::FieldTooLong`] if the value is over
/// [`MAX_STRING_LENGTH`] bytes.
pub fn validate_string_length(field_name: &'static str, value: &str) -> Result<(), ModelError> {
    if value.len() > MAX_STRING_LENGTH {
        return Err(ModelError::FieldTooLong {
            field: field_name,
            len: value.len(),
        });
    }
    Ok(())
}

/// Errors produced by model-level validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    /// A string field exceeds [`MAX_STRING_LENGTH`].
    #[error("{field} exceeds maximum length ({len} > {MAX_STRING_LENGTH})")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Actual byte length supplied.
        len: usize,
    },

    /// An outcome string did not match any known variant.
    #[error("unknown event outcome: {0}")]
    UnknownOutcome(String),
}

/// Cached caller-branding metadata for one phone number.
///
/// Created or overwritten by sync pulls, read synchronously on the call
/// path, and deleted by the periodic eviction sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandingRecord {
    /// Normalized E.164 phone number (primary key).
    pub phone_e164: String,
    /// Display name for the caller, if known.
    pub brand_name: Option<String>,
    /// Logo reference (URL), if known.
    pub logo_url: Option<String>,
    /// Call reason line (e.g. "Fraud Alert"), if known.
    pub call_reason: Option<String>,
    /// Epoch milliseconds of the last update; drives staleness and eviction.
    pub updated_at_epoch_ms: i64,
}

impl BrandingRecord {
    /// Returns true when the record carries at least one displayable field.
    #[must_use]
    pub fn has_display_fields(&self) -> bool {
        self.brand_name.as_deref().is_some_and(|s| !s.is_empty())
            || self.logo_url.as_deref().is_some_and(|s| !s.is_empty())
            || self.call_reason.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Returns true when the record is older than the staleness window
    /// ending at `now_ms`.
    #[must_use]
    pub const fn is_stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        self.updated_at_epoch_ms < now_ms.saturating_sub(ttl_ms)
    }
}

/// Outcome of one branding-display decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Branding was displayed on the call surface.
    Shown,
    /// The call proceeded without branding (miss, stale, or non-displayable
    /// record).
    Suppressed,
    /// A failure was swallowed on the interception path.
    Error,
    /// Synthetic event from the development test surface.
    Test,
}

impl EventOutcome {
    /// Stable lowercase wire string, also used as the `outcome` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shown => "shown",
            Self::Suppressed => "suppressed",
            Self::Error => "error",
            Self::Test => "test",
        }
    }

    /// Parses a stored or wire outcome string.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownOutcome`] for unrecognized input.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s {
            "shown" => Ok(Self::Shown),
            "suppressed" => Ok(Self::Suppressed),
            "error" => Ok(Self::Error),
            "test" => Ok(Self::Test),
            other => Err(ModelError::UnknownOutcome(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A branding-display event not yet persisted (no id assigned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    /// Phone number the decision was made for.
    pub phone_e164: String,
    /// Decision outcome.
    pub outcome: EventOutcome,
    /// Surface the event was displayed on, if any.
    pub surface: Option<String>,
    /// Epoch milliseconds the branding was displayed, if it was.
    pub displayed_at_epoch_ms: Option<i64>,
    /// Remote-service deduplication key.
    pub idempotency_key: Option<String>,
    /// Free-form metadata blob (JSON object).
    pub meta_json: Option<String>,
    /// Epoch milliseconds the event was created locally.
    pub created_at_epoch_ms: i64,
}

/// A persisted branding-display event with delivery state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    /// Locally unique, monotonically assigned identifier.
    pub id: i64,
    /// Phone number the decision was made for.
    pub phone_e164: String,
    /// Decision outcome.
    pub outcome: EventOutcome,
    /// Surface the event was displayed on, if any.
    pub surface: Option<String>,
    /// Epoch milliseconds the branding was displayed, if it was.
    pub displayed_at_epoch_ms: Option<i64>,
    /// Remote-service deduplication key.
    pub idempotency_key: Option<String>,
    /// Free-form metadata blob (JSON object).
    pub meta_json: Option<String>,
    /// Epoch milliseconds the event was created locally.
    pub created_at_epoch_ms: i64,
    /// Delivery flag; transitions only pending -> uploaded.
    pub uploaded: bool,
    /// Number of delivery attempts so far.
    pub attempts: u32,
    /// Error text of the most recent failed attempt.
    pub last_error: Option<String>,
}
