//! Worker subprocess dispatch.
//!
//! Each claimed job is handed to an external crawl worker as a subprocess.
//! The worker gets the full job parameters as CLI arguments and must exit 0
//! on success. A hard wall-clock timeout bounds every run: on expiry the
//! child is killed, not abandoned.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use super::job::{truncate_error, Job};

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Worker exited 0.
    Success,
    /// Worker exited non-zero or was killed by a signal.
    Failure {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    /// Worker exceeded the timeout and was killed.
    Timeout,
}

/// Result of one worker subprocess run.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    pub duration: Duration,
}

/// Spawns and supervises worker subprocesses.
#[derive(Clone)]
pub struct Dispatcher {
    worker_command: String,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher for the given worker binary and timeout.
    pub fn new(worker_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            worker_command: worker_command.into(),
            timeout,
        }
    }

    /// Builds the worker's argument vector from a job.
    pub fn build_args(job: &Job) -> Vec<String> {
        let mut args = vec![
            "--url".to_string(),
            job.url.clone(),
            "--job-id".to_string(),
            job.id.to_string(),
            "--keywords".to_string(),
            serde_json::to_string(&job.params.keywords).unwrap_or_else(|_| "[]".to_string()),
            "--match-mode".to_string(),
            job.params.match_mode.as_str().to_string(),
            "--min-matches".to_string(),
            job.params.min_matches.to_string(),
            "--use-js".to_string(),
            job.params.use_js.to_string(),
            "--max-pages-per-domain".to_string(),
            job.params.max_pages_per_domain.to_string(),
        ];

        if let Some(ref country) = job.params.country_filter {
            args.push("--country-filter".to_string());
            args.push(country.clone());
        }
        if let Some(ref lang) = job.params.lang_filter {
            args.push("--lang-filter".to_string());
            args.push(lang.clone());
        }
        if let Some(session_id) = job.session_id {
            args.push("--session-id".to_string());
            args.push(session_id.to_string());
        }

        args
    }

    /// Runs the worker for one job and waits for it to finish or time out.
    ///
    /// `kill_on_drop` guarantees the child dies when the timeout cancels the
    /// wait, so a hung worker never outlives its deadline.
    pub async fn run(&self, job: &Job) -> std::io::Result<DispatchReport> {
        let args = Self::build_args(job);
        debug!(job_id = job.id, command = %self.worker_command, "Dispatching worker");

        let started = Instant::now();

        let child = Command::new(&self.worker_command)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let outcome = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => {
                let output = result?;
                if output.status.success() {
                    DispatchOutcome::Success
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    DispatchOutcome::Failure {
                        exit_code: output.status.code(),
                        stderr_tail: truncate_error(stderr.trim()),
                    }
                }
            }
            // The cancelled wait drops the child, which kills it.
            Err(_) => DispatchOutcome::Timeout,
        };

        Ok(DispatchReport {
            outcome,
            duration: started.elapsed(),
        })
    }

    /// The configured hard timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::scheduler::job::{CrawlParams, JobStatus, MatchMode};

    use super::*;

    fn sample_job() -> Job {
        Job {
            id: 7,
            url: "https://example.com".to_string(),
            status: JobStatus::InProgress,
            priority: 100,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            last_error: None,
            params: CrawlParams {
                keywords: vec!["mairie".to_string()],
                match_mode: MatchMode::Any,
                min_matches: 1,
                country_filter: Some("FR".to_string()),
                lang_filter: None,
                use_js: true,
                max_pages_per_domain: 25,
            },
            session_id: Some(3),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_args_required_flags() {
        let args = Dispatcher::build_args(&sample_job());

        let find = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .map(|i| args[i + 1].clone())
        };

        assert_eq!(find("--url").as_deref(), Some("https://example.com"));
        assert_eq!(find("--job-id").as_deref(), Some("7"));
        assert_eq!(find("--keywords").as_deref(), Some(r#"["mairie"]"#));
        assert_eq!(find("--match-mode").as_deref(), Some("any"));
        assert_eq!(find("--use-js").as_deref(), Some("true"));
        assert_eq!(find("--country-filter").as_deref(), Some("FR"));
        assert_eq!(find("--session-id").as_deref(), Some("3"));
        assert!(find("--lang-filter").is_none());
    }

    #[tokio::test]
    async fn test_run_success() {
        let dispatcher = Dispatcher::new("true", Duration::from_secs(5));
        let report = dispatcher.run(&sample_job()).await.unwrap();
        assert_eq!(report.outcome, DispatchOutcome::Success);
    }

    #[tokio::test]
    async fn test_run_failure_captures_exit_code() {
        let dispatcher = Dispatcher::new("false", Duration::from_secs(5));
        let report = dispatcher.run(&sample_job()).await.unwrap();
        match report.outcome {
            DispatchOutcome::Failure { exit_code, .. } => assert_eq!(exit_code, Some(1)),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_timeout_kills_worker() {
        use std::os::unix::fs::PermissionsExt;

        // A worker that ignores its arguments and hangs.
        let script = std::env::temp_dir().join("crawld-test-hang.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dispatcher = Dispatcher::new(script.to_string_lossy(), Duration::from_millis(200));
        let report = dispatcher.run(&sample_job()).await.unwrap();

        assert_eq!(report.outcome, DispatchOutcome::Timeout);
        assert!(report.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_missing_binary_is_io_error() {
        let dispatcher = Dispatcher::new("definitely-not-a-real-binary-xyz", Duration::from_secs(1));
        assert!(dispatcher.run(&sample_job()).await.is_err());
    }
}
