//! Runtime configuration for the scheduler and proxy engine.
//!
//! Everything is environment-driven with sane defaults so a bare
//! `crawld run` works against local Postgres/Redis. Builder setters exist
//! for tests and embedding.

use std::collections::HashMap;
use std::time::Duration;

use crate::proxy::RotationStrategy;

/// Default Redis connection URL.
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default key namespace for all coordination-store entries.
const DEFAULT_NAMESPACE: &str = "crawld";

/// Scheduler and proxy-engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Redis connection URL for the coordination store.
    pub redis_url: String,
    /// Namespace prefix applied to every coordination key.
    pub namespace: String,
    /// How often the scheduler polls for claimable jobs.
    pub poll_interval: Duration,
    /// Maximum number of crawl workers running at once.
    pub max_concurrent_jobs: usize,
    /// Hard wall-clock timeout for one crawl worker invocation.
    pub job_timeout: Duration,
    /// Default max_retries for newly enqueued jobs.
    pub max_retries: i32,
    /// Base of the exponential retry backoff.
    pub backoff_base: f64,
    /// Unit multiplied by backoff_base^retry_count.
    pub backoff_unit: Duration,
    /// Whether a worker timeout counts as a retriable failure.
    pub retry_on_timeout: bool,
    /// Proxy selection strategy.
    pub rotation_strategy: RotationStrategy,
    /// Per-label/host weight overrides for weighted_random selection.
    pub proxy_weights: HashMap<String, f64>,
    /// How long a sticky-session affinity entry stays valid.
    pub sticky_ttl: Duration,
    /// Consecutive failures before a proxy's breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long an opened breaker stays open.
    pub breaker_cooldown: Duration,
    /// Cadence of the liveness/stats heartbeat.
    pub heartbeat_interval: Duration,
    /// Cadence of the expired-job sweep and retention GC.
    pub sweep_interval: Duration,
    /// Days a terminal job is kept before soft deletion.
    pub job_retention_days: i64,
    /// Consecutive database poll failures before the process fail-stops.
    pub max_db_failures: u32,
    /// Executable invoked for each dispatched crawl job.
    pub worker_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/crawld".to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            poll_interval: Duration::from_secs(30),
            max_concurrent_jobs: 3,
            job_timeout: Duration::from_secs(3600),
            max_retries: 3,
            backoff_base: 2.0,
            backoff_unit: Duration::from_secs(60),
            retry_on_timeout: false,
            rotation_strategy: RotationStrategy::WeightedRandom,
            proxy_weights: HashMap::new(),
            sticky_ttl: Duration::from_secs(300),
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            job_retention_days: 30,
            max_db_failures: 10,
            worker_command: "crawl-worker".to_string(),
        }
    }
}

impl Config {
    /// Builds a configuration from the environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: env_string("DATABASE_URL", &defaults.database_url),
            redis_url: env_string("REDIS_URL", &defaults.redis_url),
            namespace: env_string("CRAWLD_NAMESPACE", &defaults.namespace),
            poll_interval: env_secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs),
            job_timeout: env_secs("JOB_TIMEOUT_SECS", defaults.job_timeout),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            backoff_base: env_parse("RETRY_BACKOFF_BASE", defaults.backoff_base),
            backoff_unit: env_secs("RETRY_BACKOFF_UNIT_SECS", defaults.backoff_unit),
            retry_on_timeout: env_parse("RETRY_ON_TIMEOUT", defaults.retry_on_timeout),
            rotation_strategy: std::env::var("ROTATION_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rotation_strategy),
            proxy_weights: std::env::var("PROXY_WEIGHTS")
                .ok()
                .and_then(|v| serde_json::from_str(&v).ok())
                .unwrap_or(defaults.proxy_weights),
            sticky_ttl: env_secs("STICKY_TTL_SECS", defaults.sticky_ttl),
            breaker_failure_threshold: env_parse(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_cooldown: env_secs("BREAKER_COOLDOWN_SECS", defaults.breaker_cooldown),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            job_retention_days: env_parse("JOB_RETENTION_DAYS", defaults.job_retention_days),
            max_db_failures: env_parse("MAX_DB_FAILURES", defaults.max_db_failures),
            worker_command: env_string("WORKER_COMMAND", &defaults.worker_command),
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum number of concurrently dispatched jobs.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Sets the per-job wall-clock timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the rotation strategy.
    pub fn with_rotation_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.rotation_strategy = strategy;
        self
    }

    /// Sets the crawl worker executable.
    pub fn with_worker_command(mut self, command: impl Into<String>) -> Self {
        self.worker_command = command.into();
        self
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_cooldown, Duration::from_secs(600));
        assert_eq!(config.rotation_strategy, RotationStrategy::WeightedRandom);
        assert!(!config.retry_on_timeout);
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::default()
            .with_poll_interval(Duration::from_secs(5))
            .with_max_concurrent_jobs(8)
            .with_job_timeout(Duration::from_secs(120))
            .with_rotation_strategy(RotationStrategy::RoundRobin)
            .with_worker_command("/usr/local/bin/spider");

        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.job_timeout, Duration::from_secs(120));
        assert_eq!(config.rotation_strategy, RotationStrategy::RoundRobin);
        assert_eq!(config.worker_command, "/usr/local/bin/spider");
    }

    #[test]
    fn test_env_parse_fallback() {
        // Unset variables fall back to the provided default.
        assert_eq!(env_parse("CRAWLD_TEST_UNSET_VAR", 42_u32), 42);
        assert_eq!(
            env_secs("CRAWLD_TEST_UNSET_VAR", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }
}
