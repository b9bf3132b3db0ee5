//! Proxy rotation.
//!
//! The [`RotationEngine`] selects proxies from the fleet in
//! [`crate::storage::ProxyStore`] using a configurable strategy, gates them
//! through the per-proxy circuit breaker, and records request outcomes back
//! into both the breaker and the durable health columns.

pub mod engine;
pub mod rotation;

pub use engine::{EngineError, RotationEngine};
pub use rotation::RotationStrategy;
