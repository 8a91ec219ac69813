//! Scheduler behavior: single-run exclusivity, lock release on failure and
//! the periodic timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use marketscrape::logger::{RunLogger, VerbosityLevel};
use marketscrape::pipeline::RunSummary;
use marketscrape::scheduler::{IngestionJob, Scheduler, TriggerOutcome};

const INTERVAL: Duration = Duration::from_secs(300);

/// Blocks inside `run` until released.
#[derive(Default)]
struct GatedJob {
    started: Notify,
    release: Notify,
    runs: AtomicUsize,
}

#[async_trait]
impl IngestionJob for GatedJob {
    async fn run(&self) -> Result<RunSummary> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(RunSummary {
            success_count: 1,
            ..Default::default()
        })
    }
}

/// Completes immediately; fails while `failures` is non-zero.
#[derive(Default)]
struct CountingJob {
    runs: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingJob {
    fn failing(times: usize) -> Self {
        Self {
            runs: AtomicUsize::new(0),
            failures: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl IngestionJob for CountingJob {
    async fn run(&self) -> Result<RunSummary> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("browser failed to launch"));
        }
        Ok(RunSummary::default())
    }
}

#[tokio::test]
async fn test_overlapping_trigger_is_skipped() {
    let job = Arc::new(GatedJob::default());
    let scheduler = Arc::new(Scheduler::new(job.clone(), INTERVAL));

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.trigger().await })
    };
    job.started.notified().await;

    assert!(scheduler.lock().is_held());
    assert_eq!(scheduler.trigger().await, TriggerOutcome::Skipped);
    assert_eq!(scheduler.runs_started(), 1);
    assert!(scheduler.lock().is_held(), "a skipped trigger must not release the running one");

    job.release.notify_one();
    let outcome = first.await.unwrap();

    assert!(matches!(outcome, TriggerOutcome::Completed(ref s) if s.success_count == 1));
    assert!(!scheduler.lock().is_held());
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lock_released_after_failed_run() {
    let job = Arc::new(CountingJob::failing(1));
    let scheduler = Scheduler::new(job.clone(), INTERVAL);

    match scheduler.trigger().await {
        TriggerOutcome::Failed(message) => assert!(message.contains("browser failed to launch")),
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(!scheduler.lock().is_held());

    assert!(matches!(scheduler.trigger().await, TriggerOutcome::Completed(_)));
    assert_eq!(scheduler.runs_started(), 2);
    assert_eq!(job.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_log_flushed_after_every_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduler.log");
    let logger = RunLogger::with_log_file(VerbosityLevel::Summary, path.display().to_string());
    let scheduler = Scheduler::new(Arc::new(CountingJob::failing(2)), INTERVAL).with_logger(logger.clone());

    scheduler.trigger().await;
    assert_eq!(logger.get_log_count(), 0, "buffer drained after the first run");
    scheduler.trigger().await;
    assert_eq!(logger.get_log_count(), 0);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.matches("Ingestion run failed").count(), 2);
}

#[tokio::test]
async fn test_sequential_triggers_all_run() {
    let job = Arc::new(CountingJob::default());
    let scheduler = Scheduler::new(job.clone(), INTERVAL);

    for _ in 0..3 {
        assert!(matches!(scheduler.trigger().await, TriggerOutcome::Completed(_)));
    }
    assert_eq!(scheduler.runs_started(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timer_fires_immediately_then_every_interval() {
    let job = Arc::new(CountingJob::default());
    let scheduler = Arc::new(Scheduler::new(job.clone(), INTERVAL));

    let handle = scheduler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.runs_started(), 1);

    tokio::time::sleep(INTERVAL * 2).await;
    assert_eq!(scheduler.runs_started(), 3);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_timer_skips_firings_while_run_in_progress() {
    let job = Arc::new(GatedJob::default());
    let scheduler = Arc::new(Scheduler::new(job.clone(), INTERVAL));

    let handle = scheduler.start();
    job.started.notified().await;

    // Three more firings land while the first run is still blocked.
    tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;
    assert_eq!(scheduler.runs_started(), 1);
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    assert!(scheduler.lock().is_held());

    job.release.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!scheduler.lock().is_held());

    handle.abort();
}
