//! Job scheduling.
//!
//! The scheduler claims jobs from the Postgres-backed queue, runs each one
//! as a crawl-worker subprocess with a hard timeout, and drives the retry
//! state machine on failure. See [`runner::Scheduler`] for the loop and
//! [`dispatch::Dispatcher`] for subprocess supervision.

pub mod dispatch;
pub mod job;
pub mod runner;

pub use dispatch::{DispatchOutcome, DispatchReport, Dispatcher};
pub use job::{CrawlParams, Job, JobStatus, MatchMode, NewJob};
pub use runner::{Scheduler, SchedulerStats};
