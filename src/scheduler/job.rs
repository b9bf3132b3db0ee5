//! Job model and retry state machine.
//!
//! A `Job` is one unit of crawl work persisted in the `queue` table. The
//! scheduler claims it, dispatches the external crawl worker, and feeds the
//! outcome through [`decide_failure`] / the status columns. All transitions
//! happen in the database; nothing here is held across calls.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum stored length of `last_error`, in characters.
pub const MAX_ERROR_LEN: usize = 2000;

/// Ceiling on a single computed backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly gated by `next_retry_at`).
    Pending,
    /// Claimed by exactly one scheduler instance.
    InProgress,
    /// Finished successfully. Terminal.
    Done,
    /// Exhausted retries or failed non-retriably. Terminal.
    Failed,
}

impl JobStatus {
    /// Database representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Keyword match mode for the crawl worker's page filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// At least `min_matches` keywords must match.
    Any,
    /// Every keyword must match.
    All,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Any => "any",
            MatchMode::All => "all",
        }
    }
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(MatchMode::Any),
            "all" => Ok(MatchMode::All),
            other => Err(format!("unknown match mode: {}", other)),
        }
    }
}

/// Crawl parameters passed through to the worker subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlParams {
    /// Keywords the worker filters pages by.
    pub keywords: Vec<String>,
    /// How the keyword list is applied.
    pub match_mode: MatchMode,
    /// Minimum matching keywords for `any` mode.
    pub min_matches: i32,
    /// Optional ISO country filter.
    pub country_filter: Option<String>,
    /// Optional language filter.
    pub lang_filter: Option<String>,
    /// Whether the worker should render JavaScript.
    pub use_js: bool,
    /// Per-domain page cap.
    pub max_pages_per_domain: i32,
}

impl Default for CrawlParams {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            match_mode: MatchMode::Any,
            min_matches: 1,
            country_filter: None,
            lang_filter: None,
            use_js: false,
            max_pages_per_domain: 25,
        }
    }
}

/// A persisted crawl job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Queue row id.
    pub id: i64,
    /// Target URL to crawl.
    pub url: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Claim ordering key; lower claims first.
    pub priority: i32,
    /// Failures recorded so far.
    pub retry_count: i32,
    /// Failure budget before the job becomes terminal.
    pub max_retries: i32,
    /// Earliest time the job is claimable again (backoff gate).
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last failure diagnostic, truncated.
    pub last_error: Option<String>,
    /// Crawl parameters for the worker.
    pub params: CrawlParams,
    /// Optional browser-session reference for the worker.
    pub session_id: Option<i64>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; doubles as the claim timestamp while in progress.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for enqueueing a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub url: String,
    pub priority: i32,
    pub max_retries: i32,
    pub params: CrawlParams,
    pub session_id: Option<i64>,
}

impl NewJob {
    /// Creates a new job submission with default priority and retries.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: 100,
            max_retries: 3,
            params: CrawlParams::default(),
            session_id: None,
        }
    }

    /// Sets the claim priority (lower sorts first).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the failure budget.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the crawl parameters.
    pub fn with_params(mut self, params: CrawlParams) -> Self {
        self.params = params;
        self
    }

    /// Sets the session reference.
    pub fn with_session_id(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Computes the exponential retry delay for a job that has failed
/// `retry_count` times already: `base^retry_count × unit`, capped.
pub fn backoff_delay(base: f64, unit: Duration, retry_count: i32) -> Duration {
    let factor = base.max(1.0).powi(retry_count.max(0));
    let secs = unit.as_secs_f64() * factor;
    if secs >= MAX_BACKOFF.as_secs_f64() {
        MAX_BACKOFF
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// What to do with a job after a failed dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Re-queue as pending with the given backoff delay.
    Retry { delay: Duration },
    /// Mark failed; the job is never claimable again.
    Terminal,
}

/// Decides the retry/terminal outcome for a failed job.
///
/// A non-retriable failure (e.g. a timeout when timeouts are configured
/// non-transient) is terminal regardless of the remaining budget. Otherwise
/// the job retries until the incremented retry count reaches `max_retries`.
pub fn decide_failure(
    retry_count: i32,
    max_retries: i32,
    retriable: bool,
    backoff_base: f64,
    backoff_unit: Duration,
) -> FailureDisposition {
    if !retriable || retry_count + 1 >= max_retries {
        return FailureDisposition::Terminal;
    }
    FailureDisposition::Retry {
        delay: backoff_delay(backoff_base, backoff_unit, retry_count),
    }
}

/// Truncates a worker diagnostic to the storable length, on a char boundary.
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    message.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_backoff_is_exponential() {
        let unit = Duration::from_secs(60);

        assert_eq!(backoff_delay(2.0, unit, 0), Duration::from_secs(60));
        assert_eq!(backoff_delay(2.0, unit, 1), Duration::from_secs(120));
        assert_eq!(backoff_delay(2.0, unit, 2), Duration::from_secs(240));
        assert_eq!(backoff_delay(2.0, unit, 3), Duration::from_secs(480));
    }

    #[test]
    fn test_backoff_is_capped() {
        let delay = backoff_delay(10.0, Duration::from_secs(3600), 30);
        assert_eq!(delay, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_failure_disposition_retries_until_budget() {
        let unit = Duration::from_secs(60);

        // max_retries=3: failures at retry_count 0 and 1 retry, the third
        // failure is terminal with retry_count landing on 3.
        assert_eq!(
            decide_failure(0, 3, true, 2.0, unit),
            FailureDisposition::Retry {
                delay: Duration::from_secs(60)
            }
        );
        assert_eq!(
            decide_failure(1, 3, true, 2.0, unit),
            FailureDisposition::Retry {
                delay: Duration::from_secs(120)
            }
        );
        assert_eq!(decide_failure(2, 3, true, 2.0, unit), FailureDisposition::Terminal);
    }

    #[test]
    fn test_non_retriable_failure_is_terminal() {
        assert_eq!(
            decide_failure(0, 5, false, 2.0, Duration::from_secs(60)),
            FailureDisposition::Terminal
        );
    }

    #[test]
    fn test_zero_retry_budget_is_terminal() {
        assert_eq!(
            decide_failure(0, 0, true, 2.0, Duration::from_secs(60)),
            FailureDisposition::Terminal
        );
    }

    #[test]
    fn test_error_truncation() {
        let short = "spider exited with code 2";
        assert_eq!(truncate_error(short), short);

        let long = "x".repeat(MAX_ERROR_LEN + 500);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LEN);
    }

    #[test]
    fn test_new_job_builder() {
        let job = NewJob::new("https://example.com")
            .with_priority(10)
            .with_max_retries(5)
            .with_session_id(7);

        assert_eq!(job.url, "https://example.com");
        assert_eq!(job.priority, 10);
        assert_eq!(job.max_retries, 5);
        assert_eq!(job.session_id, Some(7));
    }

    #[test]
    fn test_crawl_params_serde() {
        let params = CrawlParams {
            keywords: vec!["mairie".to_string(), "contact".to_string()],
            match_mode: MatchMode::All,
            min_matches: 2,
            country_filter: Some("FR".to_string()),
            lang_filter: None,
            use_js: true,
            max_pages_per_domain: 50,
        };

        let json = serde_json::to_string(&params).unwrap();
        let parsed: CrawlParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, params);
        assert!(json.contains("\"all\""));
    }
}
