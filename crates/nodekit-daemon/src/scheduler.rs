//! Self-healing periodic sync scheduling.
//!
//! The daily sync is registered as a uniquely identified job with the host
//! scheduler (modeled by [`JobRegistry`]). Registration is idempotent and
//! fail-open: [`SyncScheduler::ensure_armed`] can be called from every
//! lifecycle hook (process start, boot completed, explicit re-init) without
//! creating duplicates, and a registration failure is logged, never
//! propagated. A lost or cleared schedule is therefore restored the next
//! time any hook fires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Identifier of the periodic branding-sync job. Reused on every
/// registration so the host scheduler replaces rather than duplicates.
pub const SYNC_JOB_ID: u32 = 42_001;

/// Errors from job registration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// The host registry rejected or failed the registration.
    #[error("job registry error: {0}")]
    Registry(String),
}

/// A periodic job registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Unique job identifier; re-registering the same id replaces the job.
    pub id: u32,
    /// Nominal trigger period.
    pub period: Duration,
    /// Tolerance window allowing the host to batch wake-ups.
    pub flex: Duration,
    /// Only fire when network connectivity is available.
    pub requires_network: bool,
    /// Survive device reboot.
    pub persist_across_reboot: bool,
}

impl JobSpec {
    /// The daily branding-sync job.
    #[must_use]
    pub const fn daily_sync(period: Duration, flex: Duration) -> Self {
        Self {
            id: SYNC_JOB_ID,
            period,
            flex,
            requires_network: true,
            persist_across_reboot: true,
        }
    }
}

/// Host-OS job scheduler abstraction.
///
/// The production implementation wraps the platform's persistent job
/// scheduler; tests use [`InMemoryJobRegistry`].
pub trait JobRegistry: Send + Sync {
    /// Installs or replaces the job with `spec.id`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the host rejects the registration.
    fn install(&self, spec: &JobSpec) -> Result<(), SchedulerError>;

    /// Whether a job with this id is currently registered.
    fn installed(&self, id: u32) -> bool;
}

/// In-process registry for tests and hosts without a persistent scheduler.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: Mutex<HashMap<u32, JobSpec>>,
    install_calls: AtomicUsize,
}

impl InMemoryJobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Total `install` calls observed (idempotence checks).
    #[must_use]
    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    /// Drops every registration, simulating a host that lost its schedule.
    pub fn clear(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.clear();
        }
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn install(&self, spec: &JobSpec) -> Result<(), SchedulerError> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| SchedulerError::Registry(e.to_string()))?;
        jobs.insert(spec.id, spec.clone());
        Ok(())
    }

    fn installed(&self, id: u32) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains_key(&id))
            .unwrap_or(false)
    }
}

/// Arms and re-arms the periodic sync job.
pub struct SyncScheduler {
    registry: Arc<dyn JobRegistry>,
    spec: JobSpec,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(registry: Arc<dyn JobRegistry>, period: Duration, flex: Duration) -> Self {
        Self {
            registry,
            spec: JobSpec::daily_sync(period, flex),
        }
    }

    /// Installs or refreshes the sync job. Fail-open: a registry failure is
    /// logged and swallowed so no lifecycle hook can crash on it.
    pub fn ensure_armed(&self) {
        match self.registry.install(&self.spec) {
            Ok(()) => debug!(job_id = self.spec.id, "Sync job armed"),
            Err(e) => error!(job_id = self.spec.id, error = %e, "Failed to arm sync job"),
        }
    }

    /// Process-start lifecycle hook.
    pub fn on_process_start(&self) {
        self.ensure_armed();
    }

    /// Boot-completed lifecycle hook.
    pub fn on_boot_completed(&self) {
        self.ensure_armed();
    }

    /// Whether the sync job is currently registered.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.registry.installed(self.spec.id)
    }

    /// Spawns the in-process trigger loop, invoking `run` once per period.
    ///
    /// The loop is not reentrant: a tick that arrives while a pass is still
    /// running is skipped, not queued. Missed ticks during a long pass are
    /// likewise skipped. The first invocation happens one full period after
    /// spawn.
    pub fn spawn_run_loop<F, Fut>(&self, run: F) -> SchedulerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.spec.period;
        let in_flight = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Consume the immediate first tick; the first pass runs one
            // period from now.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                        {
                            run().await;
                            in_flight.store(false, Ordering::SeqCst);
                        } else {
                            debug!("Sync pass already in flight; coalescing trigger");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Sync run loop shutting down");
                        break;
                    }
                }
            }
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Handle to a running trigger loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct RejectingRegistry;

    impl JobRegistry for RejectingRegistry {
        fn install(&self, _spec: &JobSpec) -> Result<(), SchedulerError> {
            Err(SchedulerError::Registry("quota exceeded".to_string()))
        }

        fn installed(&self, _id: u32) -> bool {
            false
        }
    }

    fn scheduler(registry: Arc<InMemoryJobRegistry>) -> SyncScheduler {
        SyncScheduler::new(
            registry,
            Duration::from_secs(24 * 60 * 60),
            Duration::from_secs(60 * 60),
        )
    }

    #[test]
    fn arming_is_idempotent_on_job_id() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = scheduler(Arc::clone(&registry));

        scheduler.ensure_armed();
        scheduler.ensure_armed();
        scheduler.on_process_start();

        assert_eq!(registry.job_count(), 1);
        assert!(registry.installed(SYNC_JOB_ID));
        assert!(scheduler.is_armed());
    }

    #[test]
    fn lost_schedule_is_restored_by_lifecycle_hooks() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = scheduler(Arc::clone(&registry));

        scheduler.on_process_start();
        assert!(scheduler.is_armed());

        // Host lost the registration (cleared schedule or fresh boot state).
        registry.clear();
        assert!(!scheduler.is_armed());

        scheduler.on_boot_completed();
        assert!(scheduler.is_armed());
        assert_eq!(registry.job_count(), 1);
    }

    #[test]
    fn registration_failure_is_swallowed() {
        let scheduler = SyncScheduler::new(
            Arc::new(RejectingRegistry),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        // Must not panic or propagate.
        scheduler.ensure_armed();
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_fires_once_per_period() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let scheduler = SyncScheduler::new(
            registry,
            Duration::from_secs(60),
            Duration::from_secs(5),
        );

        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let handle = scheduler.spawn_run_loop(move || {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Nothing before the first period elapses.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }
}
