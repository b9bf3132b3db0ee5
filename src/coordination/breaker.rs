//! TTL-key circuit breaker for unreliable resources (proxies).
//!
//! State lives entirely in self-expiring Redis keys:
//!
//! - `cb:{resource}:open`: present while the breaker is open; its expiry
//!   *is* the cooldown, so half-open needs no background timer.
//! - `cb:{resource}:half`: outlives the open key by one extra cooldown
//!   window; while it is the only key present the breaker is half-open.
//! - `cb:{resource}:fails`: rolling failure counter with a cooldown-sized
//!   window.
//!
//! Transitions: closed → open at the failure threshold; open → half-open by
//! key expiry; half-open → closed on one success, half-open → open on one
//! failure.

use std::time::Duration;

use super::{CoordinationError, Coordinator};

/// Breaker state for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Traffic flows normally.
    Closed,
    /// Cooldown elapsed; the next attempt is a probe.
    HalfOpen,
    /// Traffic to the resource is blocked.
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::HalfOpen => write!(f, "half_open"),
            BreakerState::Open => write!(f, "open"),
        }
    }
}

/// Per-resource circuit breaker over the coordination store.
#[derive(Clone)]
pub struct CircuitBreaker {
    coordinator: Coordinator,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker with the given threshold and cooldown.
    pub fn new(coordinator: Coordinator, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            coordinator,
            failure_threshold,
            cooldown,
        }
    }

    fn open_key(resource: &str) -> String {
        format!("cb:{}:open", resource)
    }

    fn half_key(resource: &str) -> String {
        format!("cb:{}:half", resource)
    }

    fn fails_key(resource: &str) -> String {
        format!("cb:{}:fails", resource)
    }

    /// Whether the breaker for a resource is currently open.
    pub async fn is_open(&self, resource: &str) -> Result<bool, CoordinationError> {
        Ok(self.coordinator.ttl_raw(&Self::open_key(resource)).await? > 0)
    }

    /// Reads the full breaker state for a resource.
    pub async fn state(&self, resource: &str) -> Result<BreakerState, CoordinationError> {
        if self.is_open(resource).await? {
            return Ok(BreakerState::Open);
        }
        if self.coordinator.ttl_raw(&Self::half_key(resource)).await? > 0 {
            return Ok(BreakerState::HalfOpen);
        }
        Ok(BreakerState::Closed)
    }

    /// Forces the breaker open for the cooldown duration.
    pub async fn open(&self, resource: &str) -> Result<(), CoordinationError> {
        self.coordinator
            .set_ex_raw(&Self::open_key(resource), "1", self.cooldown)
            .await?;
        // The half-open marker outlives the open key by one more cooldown
        // window so a probe failure can be told apart from a cold start.
        self.coordinator
            .set_ex_raw(&Self::half_key(resource), "1", self.cooldown * 2)
            .await?;
        Ok(())
    }

    /// Records a failure for a resource.
    ///
    /// Returns `true` if this failure opened (or re-opened) the breaker:
    /// either the rolling failure count reached the threshold, or the
    /// resource was half-open and the probe failed.
    pub async fn record_failure(&self, resource: &str) -> Result<bool, CoordinationError> {
        let was_half_open = self.state(resource).await? == BreakerState::HalfOpen;

        let fails_key = Self::fails_key(resource);
        let failures = self.coordinator.incr_raw(&fails_key, 1).await?;
        self.coordinator.expire_raw(&fails_key, self.cooldown).await?;

        let should_open = was_half_open || failures >= self.failure_threshold as i64;
        if should_open {
            self.open(resource).await?;
        }
        Ok(should_open)
    }

    /// Records a success, closing the breaker and clearing failure history.
    pub async fn record_success(&self, resource: &str) -> Result<(), CoordinationError> {
        self.coordinator.del_raw(&Self::fails_key(resource)).await?;
        self.coordinator.del_raw(&Self::half_key(resource)).await?;
        // A success while open should not happen (open resources are not
        // offered), but clearing the key is harmless and self-healing.
        self.coordinator.del_raw(&Self::open_key(resource)).await?;
        Ok(())
    }

    /// The configured failure threshold.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// The configured cooldown.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(CircuitBreaker::open_key("proxy:7"), "cb:proxy:7:open");
        assert_eq!(CircuitBreaker::half_key("proxy:7"), "cb:proxy:7:half");
        assert_eq!(CircuitBreaker::fails_key("proxy:7"), "cb:proxy:7:fails");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BreakerState::Closed.to_string(), "closed");
        assert_eq!(BreakerState::HalfOpen.to_string(), "half_open");
        assert_eq!(BreakerState::Open.to_string(), "open");
    }
}
