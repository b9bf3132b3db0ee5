//! Persistent storage layer (PostgreSQL).
//!
//! Postgres is the source of truth for job, proxy, and settings state; the
//! coordination layer in [`crate::coordination`] only carries ephemeral
//! state that can be lost without corrupting a crawl.

pub mod database;
pub mod jobs;
pub mod migrations;
pub mod proxies;
pub mod schema;
pub mod settings;

pub use database::{Database, DatabaseError};
pub use jobs::{JobStore, QueueCounts};
pub use migrations::{MigrationError, MigrationRunner};
pub use proxies::{Proxy, ProxyStore};
pub use settings::SettingsStore;
