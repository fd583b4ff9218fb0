//! Wire adapter for the remote branding service.
//!
//! The service speaks JSON over HTTPS with bearer authentication. The
//! engine only sees [`BrandingTransport`]; tests substitute a mock and the
//! production implementation is [`HttpBrandingTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use nodekit_core::model::{BrandingRecord, OutboxEvent};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::StoreError;

/// Errors from a sync pass or the underlying transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Connection-level failure (DNS, TLS, refused, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// Credential rejected by the service.
    #[error("authentication failed; check the configured API key")]
    Unauthorized,

    /// Service asked us to back off.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until the limit resets.
        retry_after_secs: u64,
    },

    /// Any other non-success response.
    #[error("service error: {message}")]
    Service {
        /// Error body or synthesized description.
        message: String,
        /// HTTP status code, if one was received.
        status_code: Option<u16>,
    },

    /// Local persistence failure during the pass.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Endpoint or credential not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Device registration/heartbeat payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Stable device identifier.
    pub device_id: String,
    /// Client version string.
    pub client_version: String,
}

/// Remote branding service operations used by the sync engine.
#[async_trait]
pub trait BrandingTransport: Send + Sync {
    /// Fetches branding records updated since the given epoch milliseconds,
    /// or the full set when `since` is `None`.
    async fn fetch_branding(&self, since: Option<i64>) -> Result<Vec<BrandingRecord>, SyncError>;

    /// Delivers one display event. The event's idempotency key lets the
    /// service discard duplicates from retried deliveries.
    async fn upload_event(&self, event: &OutboxEvent) -> Result<(), SyncError>;

    /// Registers or heartbeats this device. Best-effort.
    async fn register_device(&self, device: &DeviceInfo) -> Result<(), SyncError>;
}

// =============================================================================
// Wire payloads
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBrandingRecord {
    phone_e164: String,
    brand_name: Option<String>,
    logo_url: Option<String>,
    call_reason: Option<String>,
    updated_at_epoch_ms: i64,
}

impl From<WireBrandingRecord> for BrandingRecord {
    fn from(wire: WireBrandingRecord) -> Self {
        Self {
            phone_e164: wire.phone_e164,
            brand_name: wire.brand_name,
            logo_url: wire.logo_url,
            call_reason: wire.call_reason,
            updated_at_epoch_ms: wire.updated_at_epoch_ms,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    phone_e164: &'a str,
    outcome: &'a str,
    surface: Option<&'a str>,
    /// RFC 3339 display timestamp, when the event carries one.
    displayed_at: Option<String>,
    idempotency_key: Option<&'a str>,
    meta: Option<&'a str>,
}

impl<'a> WireEvent<'a> {
    fn from_event(event: &'a OutboxEvent) -> Self {
        let displayed_at = event
            .displayed_at_epoch_ms
            .and_then(DateTime::from_timestamp_millis)
            .map(|ts| ts.to_rfc3339());
        Self {
            phone_e164: &event.phone_e164,
            outcome: event.outcome.as_str(),
            surface: event.surface.as_deref(),
            displayed_at,
            idempotency_key: event.idempotency_key.as_deref(),
            meta: event.meta_json.as_deref(),
        }
    }
}

// =============================================================================
// HTTP transport
// =============================================================================

/// HTTPS client for the branding service.
pub struct HttpBrandingTransport {
    api_base_url: String,
    api_key: SecretString,
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpBrandingTransport {
    /// Creates the transport against a base URL like
    /// `https://branding.example.com`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfiguration`] for an empty or
    /// non-HTTPS-capable base URL.
    pub fn new(
        api_base_url: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self, SyncError> {
        let api_base_url = api_base_url.into();
        if api_base_url.is_empty() {
            return Err(SyncError::InvalidConfiguration(
                "api_base_url cannot be empty".to_string(),
            ));
        }
        if !api_base_url.starts_with("https://") && !api_base_url.starts_with("http://") {
            return Err(SyncError::InvalidConfiguration(format!(
                "api_base_url must be an http(s) URL: {api_base_url}"
            )));
        }

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn build_request(
        &self,
        method: &str,
        path: &str,
        body: Vec<u8>,
    ) -> Result<Request<Full<Bytes>>, SyncError> {
        Request::builder()
            .method(method)
            .uri(format!("{}{path}", self.api_base_url))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", "nodekit-daemon/0.1")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SyncError::Network(e.to_string()))
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Bytes, SyncError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        if let Some(err) = early_status_error(status, response.headers()) {
            return Err(err);
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = String::from_utf8(body.to_vec())
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(SyncError::Service {
                message,
                status_code: Some(status.as_u16()),
            });
        }

        Ok(body)
    }
}

/// Maps the statuses that short-circuit before the body is read.
///
/// Only 401 means a bad credential and only 429 means back off; any other
/// non-success status (403 included) becomes a [`SyncError::Service`] built
/// from the response body.
fn early_status_error(status: StatusCode, headers: &http::HeaderMap) -> Option<SyncError> {
    if status == StatusCode::UNAUTHORIZED {
        return Some(SyncError::Unauthorized);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = headers
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return Some(SyncError::RateLimited { retry_after_secs });
    }
    None
}

#[async_trait]
impl BrandingTransport for HttpBrandingTransport {
    async fn fetch_branding(&self, since: Option<i64>) -> Result<Vec<BrandingRecord>, SyncError> {
        let path = match since {
            Some(ms) => format!("/v1/branding?updatedSince={ms}"),
            None => "/v1/branding".to_string(),
        };
        let request = self.build_request("GET", &path, Vec::new())?;
        let body = self.send(request).await?;

        let records: Vec<WireBrandingRecord> = serde_json::from_slice(&body).map_err(|e| {
            SyncError::Service {
                message: format!("malformed branding response: {e}"),
                status_code: None,
            }
        })?;
        debug!(records = records.len(), "Fetched branding records");
        Ok(records.into_iter().map(BrandingRecord::from).collect())
    }

    async fn upload_event(&self, event: &OutboxEvent) -> Result<(), SyncError> {
        let payload = serde_json::to_vec(&WireEvent::from_event(event))
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let request = self.build_request("POST", "/v1/events", payload)?;
        self.send(request).await?;
        debug!(id = event.id, "Uploaded event");
        Ok(())
    }

    async fn register_device(&self, device: &DeviceInfo) -> Result<(), SyncError> {
        let payload =
            serde_json::to_vec(device).map_err(|e| SyncError::Network(e.to_string()))?;
        let request = self.build_request("POST", "/v1/devices", payload)?;
        self.send(request).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpBrandingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBrandingTransport")
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}
