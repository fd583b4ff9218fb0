//! The interception decision path.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use nodekit_core::identity::idempotency_key;
use nodekit_core::model::{EventOutcome, NewOutboxEvent};
use nodekit_core::phone::normalize_e164;
use tracing::{debug, warn};

use super::connection::CallConnection;
use crate::clock::SharedClock;
use crate::spool::{EventSink, TrySpoolResult};
use crate::store::BrandingStore;

/// Surface identifier recorded on events produced by this gate.
const CALL_SCREEN_SURFACE: &str = "call_screen";

/// An inbound or outbound call request as handed over by the platform.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    /// Caller address as supplied; may be absent (withheld number) or
    /// malformed.
    pub caller_address: Option<String>,
}

impl CallRequest {
    #[must_use]
    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            caller_address: Some(address.into()),
        }
    }
}

/// Decides branding for one inbound call.
///
/// `intercept` is a total function: it consumes any request and returns an
/// `Active` connection. The cache lookup is index-only and the event
/// enqueue is non-blocking, so the whole path is free of I/O waits.
pub struct CallInterceptionGate {
    branding: Arc<BrandingStore>,
    sink: Arc<dyn EventSink>,
    clock: SharedClock,
    cache_ttl_ms: i64,
    device_id: String,
}

impl CallInterceptionGate {
    #[must_use]
    pub fn new(
        branding: Arc<BrandingStore>,
        sink: Arc<dyn EventSink>,
        clock: SharedClock,
        cache_ttl_ms: i64,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            branding,
            sink,
            clock,
            cache_ttl_ms,
            device_id: device_id.into(),
        }
    }

    /// Produces an active connection for an inbound call and records the
    /// branding decision as one outbox event.
    pub fn intercept(&self, request: &CallRequest) -> CallConnection {
        let now_ms = self.clock.now_epoch_ms();
        let raw = request.caller_address.as_deref().unwrap_or("");

        let (connection, phone_for_event, outcome) = match normalize_e164(raw) {
            Ok(normalized) => match self.branding.get(&normalized) {
                Some(record) if !record.is_stale(now_ms, self.cache_ttl_ms) => {
                    if record.has_display_fields() {
                        let connection = CallConnection::new(request.caller_address.clone())
                            .with_branding(
                                record.brand_name,
                                record.logo_url,
                                record.call_reason,
                            );
                        (connection, normalized, EventOutcome::Shown)
                    } else {
                        // Fresh record with nothing to display.
                        let connection = CallConnection::new(request.caller_address.clone());
                        (connection, normalized, EventOutcome::Suppressed)
                    }
                }
                Some(_) => {
                    debug!(phone = %normalized, "Branding record stale; suppressing");
                    let connection = CallConnection::new(request.caller_address.clone());
                    (connection, normalized, EventOutcome::Suppressed)
                }
                None => {
                    let connection = CallConnection::new(request.caller_address.clone());
                    (connection, normalized, EventOutcome::Suppressed)
                }
            },
            Err(e) => {
                debug!(error = %e, "Caller address not normalizable; unbranded");
                let connection = CallConnection::new(request.caller_address.clone());
                (connection, raw.to_string(), EventOutcome::Error)
            }
        };

        self.record_decision(phone_for_event, outcome, now_ms);
        connection.activate()
    }

    /// Builds the minimal fallback connection. Never consults the cache and
    /// never records an event; used for outgoing calls and for recovery
    /// after a panic on the decision path.
    pub fn fallback(&self, request: &CallRequest) -> CallConnection {
        CallConnection::new(request.caller_address.clone()).activate()
    }

    fn record_decision(&self, phone_e164: String, outcome: EventOutcome, now_ms: i64) {
        let key = idempotency_key(&self.device_id, &phone_e164, outcome, now_ms);
        let event = NewOutboxEvent {
            phone_e164,
            outcome,
            surface: Some(CALL_SCREEN_SURFACE.to_string()),
            displayed_at_epoch_ms: Some(now_ms),
            idempotency_key: Some(key),
            meta_json: None,
            created_at_epoch_ms: now_ms,
        };
        // A dropped event never fails the call path.
        match self.sink.try_enqueue(event) {
            TrySpoolResult::Queued => {}
            TrySpoolResult::Full => warn!("Decision event dropped: spool full"),
            TrySpoolResult::Closed => warn!("Decision event dropped: spool closed"),
        }
    }
}

impl std::fmt::Debug for CallInterceptionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInterceptionGate")
            .field("cache_ttl_ms", &self.cache_ttl_ms)
            .finish_non_exhaustive()
    }
}

/// The callback surface exposed to the host telephony framework.
///
/// Wraps the gate in a panic boundary so the platform never observes an
/// unhandled fault from this crate, whatever the decision path does.
pub struct TelephonyBoundary {
    gate: Arc<CallInterceptionGate>,
}

impl TelephonyBoundary {
    #[must_use]
    pub const fn new(gate: Arc<CallInterceptionGate>) -> Self {
        Self { gate }
    }

    /// Inbound call: full branding decision, falling back to an unbranded
    /// active connection if the decision path panics.
    #[must_use]
    pub fn on_create_incoming_connection(&self, request: &CallRequest) -> CallConnection {
        let gate = Arc::clone(&self.gate);
        catch_unwind(AssertUnwindSafe(|| gate.intercept(request))).unwrap_or_else(|_| {
            warn!("Interception panicked; returning fallback connection");
            self.gate.fallback(request)
        })
    }

    /// Outbound call: branding is inbound-only, always the fallback.
    #[must_use]
    pub fn on_create_outgoing_connection(&self, request: &CallRequest) -> CallConnection {
        self.gate.fallback(request)
    }
}

impl std::fmt::Debug for TelephonyBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelephonyBoundary").finish_non_exhaustive()
    }
}
