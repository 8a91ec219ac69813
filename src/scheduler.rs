//! Periodic trigger with a single-run lock.
//!
//! The lock is an explicit handle owned by the scheduler. A run holds a
//! [`RunGuard`] for its whole duration, so the flag is cleared on every exit
//! path: success, error, early return and unwinding.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::browser::ChromeSession;
use crate::config::AppConfig;
use crate::logger::RunLogger;
use crate::pipeline::{IngestionPipeline, RunSummary};
use crate::reconcile::Reconciler;
use crate::store::AssetStore;

/// "Ingestion in progress" flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    running: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` when a run already holds it.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_held(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the run lock on drop.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// One ingestion run.
#[async_trait]
pub trait IngestionJob: Send + Sync {
    async fn run(&self) -> Result<RunSummary>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed(RunSummary),
    /// The job returned an error; the text is the full error chain.
    Failed(String),
    /// Another run held the lock.
    Skipped,
}

pub struct Scheduler {
    job: Arc<dyn IngestionJob>,
    lock: RunLock,
    interval: Duration,
    runs_started: AtomicUsize,
    logger: RunLogger,
}

impl Scheduler {
    pub fn new(job: Arc<dyn IngestionJob>, interval: Duration) -> Self {
        Self {
            job,
            lock: RunLock::new(),
            interval,
            runs_started: AtomicUsize::new(0),
            logger: RunLogger::silent(),
        }
    }

    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs that actually started; skipped triggers are not counted.
    pub fn runs_started(&self) -> usize {
        self.runs_started.load(Ordering::SeqCst)
    }

    /// Run the job now unless a run is already in progress.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Some(_guard) = self.lock.try_acquire() else {
            info!("Ingestion already running; trigger skipped");
            self.logger.log_run_skipped();
            return TriggerOutcome::Skipped;
        };

        let run = self.runs_started.fetch_add(1, Ordering::SeqCst) + 1;
        info!(run, "Ingestion run started");

        let outcome = match self.job.run().await {
            Ok(summary) => TriggerOutcome::Completed(summary),
            Err(e) => {
                error!(run, "Ingestion run failed: {:#}", e);
                self.logger.error(&format!("Ingestion run failed: {:#}", e));
                TriggerOutcome::Failed(format!("{:#}", e))
            }
        };

        // Flush per run so a long-lived scheduler does not buffer every message.
        if let Err(e) = self.logger.export_logs() {
            warn!(run, "Failed to export run log: {}", e);
        }
        outcome
    }

    /// Fire immediately, then every `interval`. Each firing runs on its own
    /// task so a long run never delays the timer; overlapping firings are
    /// skipped by the lock.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Scheduler started (every {:?})", scheduler.interval);

            loop {
                ticker.tick().await;
                let firing = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    if let TriggerOutcome::Completed(summary) = firing.trigger().await {
                        info!(
                            success = summary.success_count,
                            errors = summary.error_count,
                            "Scheduled run completed"
                        );
                    }
                });
            }
        })
    }
}

/// Production job: launch Chrome, walk the listing, reconcile into the store.
pub struct ChromeIngestionJob {
    config: AppConfig,
    store: Arc<dyn AssetStore>,
    logger: RunLogger,
}

impl ChromeIngestionJob {
    pub fn new(config: AppConfig, store: Arc<dyn AssetStore>, logger: RunLogger) -> Self {
        Self {
            config,
            store,
            logger,
        }
    }
}

#[async_trait]
impl IngestionJob for ChromeIngestionJob {
    async fn run(&self) -> Result<RunSummary> {
        let pipeline = IngestionPipeline::from_config(&self.config, Reconciler::new(Arc::clone(&self.store)))?
            .with_logger(self.logger.clone());
        let session = ChromeSession::launch(&self.config.browser).await?;
        Ok(pipeline.run(&session).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let lock = RunLock::new();
        let guard = lock.try_acquire().expect("first acquire");
        assert!(lock.is_held());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let lock = RunLock::new();
        let other = lock.clone();
        let _guard = lock.try_acquire().unwrap();
        assert!(other.is_held());
        assert!(other.try_acquire().is_none());
    }

    #[test]
    fn test_lock_released_on_panic() {
        let lock = RunLock::new();
        let inner = lock.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.try_acquire().unwrap();
            panic!("run blew up");
        });
        assert!(result.is_err());
        assert!(!lock.is_held());
    }
}
