//! Runtime configuration.
//!
//! [`NodeKitConfig`] carries the remote endpoint plus the tuning knobs the
//! distilled product requirements leave open: the cache staleness window,
//! the two retention cutoffs, the upload batch size, and the sync period.
//! Defaults match the original deployment (30-day staleness, 90-day cache
//! sweep, 30-day outbox retention, batch of 50, 24 h +/- 1 h job).
//!
//! Only non-secret settings are persisted; the API key lives in the
//! keyring-backed [`crate::credentials::ApiKeyStore`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for configuration string fields.
const MAX_CONFIG_STRING_LENGTH: usize = 2048;

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Default staleness window for cached branding records (30 days).
pub const DEFAULT_CACHE_TTL_MS: u64 = 30 * MS_PER_DAY;

/// Default retention window before cached records are evicted (90 days).
pub const DEFAULT_CACHE_RETENTION_MS: u64 = 90 * MS_PER_DAY;

/// Default retention window for uploaded outbox events (30 days).
pub const DEFAULT_OUTBOX_RETENTION_MS: u64 = 30 * MS_PER_DAY;

/// Default number of pending events drained per sync pass.
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 50;

/// Default sync period (24 hours).
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Default flex window allowing the host to batch the sync job with other
/// wake-ups (1 hour).
pub const DEFAULT_SYNC_FLEX: Duration = Duration::from_secs(60 * 60);

/// Errors from configuration validation or settings persistence.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A string field was empty or exceeded the maximum length.
    #[error("invalid configuration: {0}")]
    InvalidField(String),

    /// Settings file could not be read or written.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file was not valid JSON.
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// NodeKit runtime configuration.
#[derive(Debug, Clone)]
pub struct NodeKitConfig {
    /// Remote branding service base URL.
    pub api_url: String,
    /// Optional caller-supplied device id; derived from the install seed
    /// when absent.
    pub device_id: Option<String>,
    /// Staleness window: cached records older than this are not trusted for
    /// display.
    pub cache_ttl_ms: u64,
    /// Eviction window for cached branding records.
    pub cache_retention_ms: u64,
    /// Retention window for uploaded outbox events.
    pub outbox_retention_ms: u64,
    /// Maximum pending events drained per sync pass.
    pub upload_batch_size: usize,
    /// Nominal period of the scheduled sync job.
    pub sync_period: Duration,
    /// Flex window for the scheduled sync job.
    pub sync_flex: Duration,
}

impl NodeKitConfig {
    /// Creates a configuration for the given endpoint with default windows.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the URL is empty or over
    /// the length limit.
    pub fn new(api_url: impl Into<String>) -> Result<Self, ConfigError> {
        let api_url = api_url.into();
        Self::validate_field("api_url", &api_url)?;
        Ok(Self {
            api_url,
            device_id: None,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            cache_retention_ms: DEFAULT_CACHE_RETENTION_MS,
            outbox_retention_ms: DEFAULT_OUTBOX_RETENTION_MS,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            sync_period: DEFAULT_SYNC_PERIOD,
            sync_flex: DEFAULT_SYNC_FLEX,
        })
    }

    fn validate_field(field_name: &str, value: &str) -> Result<(), ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::InvalidField(format!(
                "{field_name} cannot be empty"
            )));
        }
        if value.len() > MAX_CONFIG_STRING_LENGTH {
            return Err(ConfigError::InvalidField(format!(
                "{field_name} exceeds maximum length ({} > {MAX_CONFIG_STRING_LENGTH})",
                value.len()
            )));
        }
        Ok(())
    }

    /// Sets an explicit device id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for an empty or oversized id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Result<Self, ConfigError> {
        let device_id = device_id.into();
        Self::validate_field("device_id", &device_id)?;
        self.device_id = Some(device_id);
        Ok(self)
    }

    /// Sets the cache staleness window.
    #[must_use]
    pub const fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    /// Sets the cache eviction window.
    #[must_use]
    pub const fn with_cache_retention_ms(mut self, retention_ms: u64) -> Self {
        self.cache_retention_ms = retention_ms;
        self
    }

    /// Sets the uploaded-event retention window.
    #[must_use]
    pub const fn with_outbox_retention_ms(mut self, retention_ms: u64) -> Self {
        self.outbox_retention_ms = retention_ms;
        self
    }

    /// Sets the per-pass upload batch size.
    #[must_use]
    pub const fn with_upload_batch_size(mut self, size: usize) -> Self {
        self.upload_batch_size = size;
        self
    }

    /// Sets the sync job period and flex window.
    #[must_use]
    pub const fn with_sync_schedule(mut self, period: Duration, flex: Duration) -> Self {
        self.sync_period = period;
        self.sync_flex = flex;
        self
    }
}

/// Non-secret settings persisted across process restarts.
///
/// The scheduled sync job re-initializes the runtime on its own; it needs
/// the endpoint URL even when the host application has not run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Remote branding service base URL.
    pub api_url: String,
}

impl PersistedSettings {
    /// Loads settings from `path`, returning `None` when the file does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read or parse failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Atomically persists settings to `path` (write temp file, rename).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on serialization or I/O failure.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
