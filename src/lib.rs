//! crawld: crawl job scheduling and proxy rotation.
//!
//! The crate has three pillars:
//!
//! - [`scheduler`]: claims jobs from a Postgres-backed queue with
//!   `SKIP LOCKED`, runs each one as a crawl-worker subprocess under a hard
//!   timeout, and drives the retry state machine.
//! - [`proxy`]: rotates a proxy fleet across workers with pluggable
//!   strategies, gated by a per-proxy circuit breaker.
//! - [`coordination`]: Redis-backed primitives shared by scheduler
//!   instances and workers: locks, counters, a TTL cache, and the
//!   seen-URL dedup set.
//!
//! Postgres is the source of truth; the coordination store only holds
//! ephemeral state that can be lost without corrupting a crawl.

pub mod cli;
pub mod config;
pub mod coordination;
pub mod metrics;
pub mod proxy;
pub mod scheduler;
pub mod storage;
pub mod urlnorm;

pub use config::Config;
pub use coordination::{CircuitBreaker, CoordinationError, Coordinator, LockGuard, SeenUrls};
pub use proxy::{EngineError, RotationEngine, RotationStrategy};
pub use scheduler::{Dispatcher, Job, JobStatus, NewJob, Scheduler};
pub use storage::{Database, DatabaseError, JobStore, ProxyStore, SettingsStore};
