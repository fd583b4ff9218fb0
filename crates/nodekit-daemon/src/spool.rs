//! Non-blocking event spool between the call path and the outbox.
//!
//! The interception gate runs on the host's telephony callback and must
//! never block on disk I/O, so it hands events to an [`EventSink`] instead
//! of writing the outbox directly. The production sink is a bounded channel
//! drained by a background task; event drops under extreme backpressure are
//! preferred over delaying call setup, and every drop is logged.

use std::sync::Arc;

use nodekit_core::model::NewOutboxEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::EventOutbox;

/// Default spool channel capacity.
///
/// Events arrive at most one per incoming call; a backlog this deep means
/// the drain task has been stalled for far longer than any call burst.
pub const DEFAULT_SPOOL_CAPACITY: usize = 256;

/// Result of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySpoolResult {
    /// Event accepted for durable append.
    Queued,
    /// Spool at capacity; the event was dropped.
    Full,
    /// Drain side gone; the event was dropped.
    Closed,
}

/// Accepts branding-display events without blocking the caller.
///
/// Implementations must be cheap and infallible from the caller's view:
/// the gate ignores the returned status beyond logging.
pub trait EventSink: Send + Sync {
    /// Attempts to enqueue one event. Never blocks.
    fn try_enqueue(&self, event: NewOutboxEvent) -> TrySpoolResult;
}

/// Channel-backed sink for the telephony path.
#[derive(Debug, Clone)]
pub struct SpoolSink {
    tx: mpsc::Sender<NewOutboxEvent>,
}

impl EventSink for SpoolSink {
    fn try_enqueue(&self, event: NewOutboxEvent) -> TrySpoolResult {
        match self.tx.try_send(event) {
            Ok(()) => TrySpoolResult::Queued,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    phone = %dropped.phone_e164,
                    outcome = %dropped.outcome,
                    "Event spool full; dropping event"
                );
                TrySpoolResult::Full
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(
                    phone = %dropped.phone_e164,
                    outcome = %dropped.outcome,
                    "Event spool closed; dropping event"
                );
                TrySpoolResult::Closed
            }
        }
    }
}

/// Creates a spool sink and spawns its drain task.
///
/// The drain task appends each received event to the outbox via
/// `spawn_blocking` (the append is a synchronous SQLite write). Append
/// failures are logged and the event is lost; the task keeps draining.
/// The task ends when every `SpoolSink` clone is dropped.
pub fn spawn_spool(
    outbox: Arc<EventOutbox>,
    capacity: usize,
) -> (SpoolSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<NewOutboxEvent>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let outbox = Arc::clone(&outbox);
            let result =
                tokio::task::spawn_blocking(move || outbox.append(&event)).await;
            match result {
                Ok(Ok(id)) => debug!(id, "Spooled event appended"),
                Ok(Err(e)) => error!(error = %e, "Failed to append spooled event"),
                Err(e) => error!(error = %e, "Spool append task failed"),
            }
        }
        debug!("Event spool drained and closed");
    });
    (SpoolSink { tx }, handle)
}

/// Sink that appends inline on the calling thread.
///
/// Used by hosts without a runtime of their own and by tests that need the
/// append visible immediately. Append failures are swallowed and logged,
/// matching the fail-open contract of the call path.
#[derive(Debug)]
pub struct DirectSink {
    outbox: Arc<EventOutbox>,
}

impl DirectSink {
    #[must_use]
    pub const fn new(outbox: Arc<EventOutbox>) -> Self {
        Self { outbox }
    }
}

impl EventSink for DirectSink {
    fn try_enqueue(&self, event: NewOutboxEvent) -> TrySpoolResult {
        match self.outbox.append(&event) {
            Ok(_) => TrySpoolResult::Queued,
            Err(e) => {
                error!(error = %e, "Failed to append event inline");
                TrySpoolResult::Closed
            }
        }
    }
}
