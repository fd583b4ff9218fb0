//! Host-facing plugin surface.
//!
//! The host application talks to NodeKit through [`NodeKit`]: `initialize`
//! wires the stores, gate, transport, and scheduler together;
//! `sync_branding` runs an on-demand pass and reports its result as data
//! (never a panic); the telephony boundary is exposed for the host's
//! connection service. Configuration errors are the only failures callers
//! see; everything downstream of `initialize` is fail-open.

use std::path::PathBuf;
use std::sync::Arc;

use nodekit_core::config::{ConfigError, NodeKitConfig, PersistedSettings};
use nodekit_core::credentials::{ApiKeyStore, CredentialError};
use nodekit_core::identity::derive_device_id;
use nodekit_core::model::{EventOutcome, NewOutboxEvent};
use secrecy::SecretString;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::gate::{CallInterceptionGate, TelephonyBoundary};
use crate::scheduler::{JobRegistry, SchedulerHandle, SyncScheduler};
use crate::spool::{DEFAULT_SPOOL_CAPACITY, DirectSink, EventSink, TrySpoolResult, spawn_spool};
use crate::store::{BrandingStore, EventOutbox, StoreError, open_database};
use crate::sync::{BrandingTransport, HttpBrandingTransport, SyncEngine, SyncError};

/// Settings file name under the data directory.
const SETTINGS_FILE: &str = "settings.json";

/// Database file name under the data directory.
const DATABASE_FILE: &str = "nodekit.db";

/// Errors surfaced to the host from `initialize`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Endpoint or settings problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Credential could not be stored or read.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Local database could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport could not be constructed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result of an on-demand sync, shaped for the host bridge: errors are
/// data, not exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBrandingResult {
    /// Whether the pull stage succeeded.
    pub success: bool,
    /// Branding records updated by the pass.
    pub records_updated: usize,
    /// Error description when `success` is false.
    pub error: Option<String>,
}

/// Everything `initialize` needs from the host.
pub struct PluginOptions {
    /// Validated runtime configuration.
    pub config: NodeKitConfig,
    /// Directory for the database and persisted settings.
    pub data_dir: PathBuf,
    /// Installation seed for device-id derivation (package name plus
    /// platform installation id, or equivalent).
    pub install_seed: String,
    /// Credential store; keyring-backed in production.
    pub credentials: ApiKeyStore,
    /// Host job scheduler.
    pub registry: Arc<dyn JobRegistry>,
    /// Time source.
    pub clock: SharedClock,
    /// Transport override; `None` builds the HTTPS transport from the
    /// configured endpoint.
    pub transport: Option<Arc<dyn BrandingTransport>>,
}

/// The assembled runtime.
pub struct NodeKit {
    device_id: String,
    branding: Arc<BrandingStore>,
    outbox: Arc<EventOutbox>,
    sink: Arc<dyn EventSink>,
    boundary: TelephonyBoundary,
    engine: Arc<SyncEngine>,
    scheduler: SyncScheduler,
    clock: SharedClock,
    run_loop: Option<SchedulerHandle>,
    spool_drain: Option<JoinHandle<()>>,
}

impl NodeKit {
    /// Configures the endpoint and credential, opens the local stores,
    /// arms the sync scheduler, and returns the assembled runtime.
    ///
    /// Persists the endpoint URL (the scheduled job re-initializes from it)
    /// and hands the API key to the credential store. When called inside a
    /// Tokio runtime this also starts the event spool and the periodic run
    /// loop; without a runtime, events are appended inline and only the
    /// host-scheduled job drives syncs.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] for an unusable endpoint, credential-store
    /// failure, or an unopenable database. These are the only errors the
    /// host ever has to handle.
    pub fn initialize(options: PluginOptions, api_key: SecretString) -> Result<Self, PluginError> {
        let PluginOptions {
            config,
            data_dir,
            install_seed,
            credentials,
            registry,
            clock,
            transport,
        } = options;

        credentials.store(api_key.clone())?;
        PersistedSettings {
            api_url: config.api_url.clone(),
        }
        .store(data_dir.join(SETTINGS_FILE))?;

        let conn = open_database(data_dir.join(DATABASE_FILE))?;
        let branding = Arc::new(BrandingStore::new(Arc::clone(&conn))?);
        let outbox = Arc::new(EventOutbox::new(conn));

        let device_id = config
            .device_id
            .clone()
            .unwrap_or_else(|| derive_device_id(&install_seed));
        let config = if config.device_id.is_some() {
            config
        } else {
            config.with_device_id(device_id.clone())?
        };

        let transport: Arc<dyn BrandingTransport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpBrandingTransport::new(config.api_url.clone(), api_key)?),
        };

        let in_runtime = tokio::runtime::Handle::try_current().is_ok();
        let (sink, spool_drain): (Arc<dyn EventSink>, Option<JoinHandle<()>>) = if in_runtime {
            let (sink, drain) = spawn_spool(Arc::clone(&outbox), DEFAULT_SPOOL_CAPACITY);
            (Arc::new(sink), Some(drain))
        } else {
            (Arc::new(DirectSink::new(Arc::clone(&outbox))), None)
        };

        #[allow(clippy::cast_possible_wrap)]
        let gate = Arc::new(CallInterceptionGate::new(
            Arc::clone(&branding),
            Arc::clone(&sink),
            Arc::clone(&clock),
            config.cache_ttl_ms as i64,
            device_id.clone(),
        ));
        let boundary = TelephonyBoundary::new(gate);

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&branding),
            Arc::clone(&outbox),
            transport,
            Arc::clone(&clock),
            config.clone(),
        ));

        let scheduler = SyncScheduler::new(registry, config.sync_period, config.sync_flex);
        scheduler.on_process_start();

        let run_loop = if in_runtime {
            let engine_for_loop = Arc::clone(&engine);
            Some(scheduler.spawn_run_loop(move || {
                let engine = Arc::clone(&engine_for_loop);
                async move {
                    engine.run_once().await;
                }
            }))
        } else {
            None
        };

        info!(device_id = %device_id, "NodeKit initialized");
        Ok(Self {
            device_id,
            branding,
            outbox,
            sink,
            boundary,
            engine,
            scheduler,
            clock,
            run_loop,
            spool_drain,
        })
    }

    /// Runs an on-demand sync pass and reports the outcome as data.
    pub async fn sync_branding(&self) -> SyncBrandingResult {
        let report = self.engine.run_once().await;
        SyncBrandingResult {
            success: report.pull_ok(),
            records_updated: report.records_pulled,
            error: report.pull_error,
        }
    }

    /// The callback surface to register with the host telephony framework.
    #[must_use]
    pub const fn telephony(&self) -> &TelephonyBoundary {
        &self.boundary
    }

    /// Stable identifier of this installation.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Simulates an incoming call through the full interception path.
    /// Development builds only.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn test_incoming_call(&self, phone_number: &str) -> Option<crate::gate::CallConnection> {
        let request = crate::gate::CallRequest::from_address(phone_number);
        Some(self.boundary.on_create_incoming_connection(&request))
    }

    /// No-op in release builds.
    #[cfg(not(debug_assertions))]
    #[must_use]
    pub fn test_incoming_call(&self, _phone_number: &str) -> Option<crate::gate::CallConnection> {
        None
    }

    /// Records a missed-call telemetry event and returns its call id.
    /// Fail-open: a dropped event still returns an id.
    pub fn record_missed_call(&self, phone_number: &str) -> String {
        let call_id = Uuid::new_v4().to_string();
        let now_ms = self.clock.now_epoch_ms();
        let event = NewOutboxEvent {
            phone_e164: phone_number.to_string(),
            outcome: EventOutcome::Test,
            surface: None,
            displayed_at_epoch_ms: None,
            idempotency_key: None,
            meta_json: Some(format!(
                r#"{{"kind":"missed_call","callId":"{call_id}"}}"#
            )),
            created_at_epoch_ms: now_ms,
        };
        if self.sink.try_enqueue(event) != TrySpoolResult::Queued {
            warn!(call_id = %call_id, "Missed-call event dropped");
        }
        call_id
    }

    /// Number of events awaiting upload (diagnostics).
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.outbox.count_pending().unwrap_or(0)
    }

    /// Number of cached branding records (diagnostics).
    #[must_use]
    pub fn cached_branding_count(&self) -> usize {
        self.branding.count()
    }

    /// Re-arms the sync job; safe to call from any lifecycle hook.
    pub fn on_boot_completed(&self) {
        self.scheduler.on_boot_completed();
    }

    /// Stops the periodic run loop and flushes the event spool.
    ///
    /// Events already queued in the spool are appended before this returns:
    /// dropping the runtime releases the last sink references, which closes
    /// the spool channel and lets the drain task finish its backlog.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.run_loop.take() {
            handle.shutdown().await;
        }
        let drain = self.spool_drain.take();
        drop(self);
        if let Some(handle) = drain {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for NodeKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKit")
            .field("device_id", &self.device_id)
            .field("cached_branding", &self.cached_branding_count())
            .field("pending_events", &self.pending_event_count())
            .finish_non_exhaustive()
    }
}
