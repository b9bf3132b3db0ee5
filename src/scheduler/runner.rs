//! Scheduler run loop.
//!
//! One instance polls the queue, claims jobs, and supervises worker
//! subprocesses up to the concurrency cap. Multiple instances can run
//! against the same database; `SKIP LOCKED` claiming keeps them from
//! colliding. Heartbeat and sweep run on their own cadences inside the
//! same select loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::storage::{DatabaseError, JobStore, SettingsStore};

use super::dispatch::{DispatchOutcome, Dispatcher};
use super::job::{decide_failure, truncate_error, FailureDisposition, Job};

/// Grace added to the job timeout before the sweep force-fails a claim.
const SWEEP_GRACE: Duration = Duration::from_secs(60);

/// Shared counters published through the heartbeat.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub processed: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
}

impl SchedulerStats {
    fn snapshot(&self, uptime: Duration) -> serde_json::Value {
        serde_json::json!({
            "processed": self.processed.load(Ordering::Relaxed),
            "retried": self.retried.load(Ordering::Relaxed),
            "failed": self.failed.load(Ordering::Relaxed),
            "uptime_secs": uptime.as_secs(),
        })
    }
}

/// The job scheduler.
pub struct Scheduler {
    config: Config,
    jobs: JobStore,
    settings: SettingsStore,
    dispatcher: Dispatcher,
    shutdown: broadcast::Sender<()>,
    stats: Arc<SchedulerStats>,
    started: std::time::Instant,
}

impl Scheduler {
    /// Creates a scheduler over the given stores.
    pub fn new(config: Config, jobs: JobStore, settings: SettingsStore) -> Self {
        let dispatcher = Dispatcher::new(config.worker_command.clone(), config.job_timeout);
        let (shutdown, _) = broadcast::channel(1);

        Self {
            config,
            jobs,
            settings,
            dispatcher,
            shutdown,
            stats: Arc::new(SchedulerStats::default()),
            started: std::time::Instant::now(),
        }
    }

    /// Returns a handle that triggers graceful shutdown when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Runs the scheduler until shutdown is requested or the database is
    /// deemed unreachable.
    pub async fn run(&self) -> Result<(), DatabaseError> {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_jobs,
            worker = %self.config.worker_command,
            "Scheduler starting"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut consecutive_db_failures: u32 = 0;

        let mut poll_tick = tokio::time::interval(self.config.poll_interval);
        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval);
        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = poll_tick.tick() => {
                    match self.poll_cycle(&mut in_flight).await {
                        Ok(()) => {
                            consecutive_db_failures = 0;
                        }
                        Err(e) => {
                            consecutive_db_failures += 1;
                            error!(
                                error = %e,
                                consecutive = consecutive_db_failures,
                                "Poll cycle failed"
                            );
                            if consecutive_db_failures >= self.config.max_db_failures {
                                error!("Database failure limit reached, stopping scheduler");
                                break;
                            }
                            // Back off harder the longer the database stays down.
                            let backoff = Duration::from_secs(
                                2u64.saturating_pow(consecutive_db_failures.min(6)),
                            );
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
                _ = heartbeat_tick.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(error = %e, "Heartbeat write failed");
                    }
                }
                _ = sweep_tick.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Sweep failed");
                    }
                }
                Some(result) = in_flight.join_next() => {
                    if let Err(e) = result {
                        error!(error = %e, "Job task panicked");
                    }
                    metrics::record_in_flight(-1.0);
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                }
            }
        }

        self.drain(in_flight).await;
        info!("Scheduler stopped");
        Ok(())
    }

    /// One poll: honor the pause flag, then claim and dispatch jobs up to
    /// the concurrency cap.
    async fn poll_cycle(&self, in_flight: &mut JoinSet<()>) -> Result<(), DatabaseError> {
        if self.settings.is_paused().await? {
            debug!("Scheduler paused, skipping claims");
            return Ok(());
        }

        self.publish_queue_depth().await?;

        while in_flight.len() < self.config.max_concurrent_jobs {
            let Some(job) = self.jobs.claim_next().await? else {
                break;
            };

            info!(
                job_id = job.id,
                url = %job.url,
                retry_count = job.retry_count,
                "Claimed job"
            );

            let jobs = self.jobs.clone();
            let dispatcher = self.dispatcher.clone();
            let stats = Arc::clone(&self.stats);
            let backoff_base = self.config.backoff_base;
            let backoff_unit = self.config.backoff_unit;
            let retry_on_timeout = self.config.retry_on_timeout;

            metrics::record_job_claimed();
            metrics::record_in_flight(1.0);
            in_flight.spawn(async move {
                process_job(
                    job,
                    jobs,
                    dispatcher,
                    stats,
                    backoff_base,
                    backoff_unit,
                    retry_on_timeout,
                )
                .await;
            });
        }

        Ok(())
    }

    async fn publish_queue_depth(&self) -> Result<(), DatabaseError> {
        let counts = self.jobs.counts().await?;
        metrics::record_queue_depth("pending", counts.pending);
        metrics::record_queue_depth("in_progress", counts.in_progress);
        metrics::record_queue_depth("done", counts.done);
        metrics::record_queue_depth("failed", counts.failed);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), DatabaseError> {
        self.settings
            .heartbeat(&self.stats.snapshot(self.started.elapsed()))
            .await
    }

    /// Force-fails orphaned in-progress jobs and retires old terminal rows.
    async fn sweep(&self) -> Result<(), DatabaseError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.job_timeout + SWEEP_GRACE)
                .unwrap_or_else(|_| chrono::Duration::hours(2));

        let swept = self.jobs.sweep_expired(cutoff).await?;
        if swept > 0 {
            warn!(count = swept, "Swept expired in-progress jobs");
        }

        let retired = self.jobs.gc_terminal(self.config.job_retention_days).await?;
        if retired > 0 {
            info!(count = retired, "Retired old terminal jobs");
        }

        Ok(())
    }

    /// Waits for in-flight workers to finish, bounded by the job timeout.
    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        info!(count = in_flight.len(), "Waiting for in-flight jobs");
        let deadline = self.config.job_timeout + SWEEP_GRACE;

        let drained = tokio::time::timeout(deadline, async {
            while in_flight.join_next().await.is_some() {
                metrics::record_in_flight(-1.0);
            }
        })
        .await;

        if drained.is_err() {
            warn!("Drain deadline reached, aborting remaining jobs");
            in_flight.abort_all();
        }
    }
}

/// Dispatches one claimed job and records the outcome.
async fn process_job(
    job: Job,
    jobs: JobStore,
    dispatcher: Dispatcher,
    stats: Arc<SchedulerStats>,
    backoff_base: f64,
    backoff_unit: Duration,
    retry_on_timeout: bool,
) {
    let job_id = job.id;

    let report = match dispatcher.run(&job).await {
        Ok(report) => report,
        Err(e) => {
            // Spawn failure: the worker never ran, treat as a retriable
            // failure so a transient exec problem doesn't burn the job.
            error!(job_id, error = %e, "Failed to spawn worker");
            let message = truncate_error(&format!("spawn failed: {}", e));
            settle_failure(
                &jobs, &job, &message, true, backoff_base, backoff_unit, &stats,
            )
            .await;
            return;
        }
    };

    metrics::record_dispatch_duration(report.duration.as_secs_f64());

    match report.outcome {
        DispatchOutcome::Success => {
            info!(
                job_id,
                duration_secs = report.duration.as_secs(),
                "Job completed"
            );
            if let Err(e) = jobs.mark_done(job_id).await {
                error!(job_id, error = %e, "Failed to mark job done");
                return;
            }
            stats.processed.fetch_add(1, Ordering::Relaxed);
            metrics::record_job_outcome("done");
        }
        DispatchOutcome::Failure {
            exit_code,
            stderr_tail,
        } => {
            let message = match exit_code {
                Some(code) => truncate_error(&format!("exit {}: {}", code, stderr_tail)),
                None => truncate_error(&format!("killed by signal: {}", stderr_tail)),
            };
            warn!(job_id, exit_code = ?exit_code, "Job failed");
            settle_failure(&jobs, &job, &message, true, backoff_base, backoff_unit, &stats).await;
        }
        DispatchOutcome::Timeout => {
            warn!(
                job_id,
                timeout_secs = dispatcher.timeout().as_secs(),
                "Job timed out, worker killed"
            );
            let message = format!("timed out after {}s", dispatcher.timeout().as_secs());
            settle_failure(
                &jobs,
                &job,
                &message,
                retry_on_timeout,
                backoff_base,
                backoff_unit,
                &stats,
            )
            .await;
        }
    }
}

/// Applies the retry/terminal decision for a failed job.
async fn settle_failure(
    jobs: &JobStore,
    job: &Job,
    message: &str,
    retriable: bool,
    backoff_base: f64,
    backoff_unit: Duration,
    stats: &SchedulerStats,
) {
    let disposition = decide_failure(
        job.retry_count,
        job.max_retries,
        retriable,
        backoff_base,
        backoff_unit,
    );

    match disposition {
        FailureDisposition::Retry { delay } => {
            let next_retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));

            info!(
                job_id = job.id,
                retry_count = job.retry_count + 1,
                delay_secs = delay.as_secs(),
                "Scheduling retry"
            );

            if let Err(e) = jobs.mark_retry(job.id, next_retry_at, message).await {
                error!(job_id = job.id, error = %e, "Failed to schedule retry");
                return;
            }
            stats.retried.fetch_add(1, Ordering::Relaxed);
            metrics::record_job_outcome("retried");
        }
        FailureDisposition::Terminal => {
            warn!(job_id = job.id, error = message, "Job failed terminally");

            if let Err(e) = jobs.mark_failed(job.id, message).await {
                error!(job_id = job.id, error = %e, "Failed to mark job failed");
                return;
            }
            stats.failed.fetch_add(1, Ordering::Relaxed);
            metrics::record_job_outcome("failed");
        }
    }
}
