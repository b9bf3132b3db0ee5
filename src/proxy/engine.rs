//! Proxy rotation engine.
//!
//! Ties candidate fetch, breaker gating, strategy selection, and health
//! bookkeeping together. The engine is the only component that hands
//! proxies to workers; outcome reports flow back through it so the breaker
//! and the stored health metrics stay consistent.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coordination::{CircuitBreaker, CoordinationError, Coordinator};
use crate::metrics;
use crate::storage::{DatabaseError, Proxy, ProxyStore};

use super::rotation::{select_index, RotationStrategy};

/// TTL for the short advisory lock around selection.
const SELECT_LOCK_TTL: Duration = Duration::from_secs(3);

/// Errors from the rotation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Proxy store operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// Coordination-store operation failed.
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),
}

/// Rotation engine over the proxy fleet.
#[derive(Clone)]
pub struct RotationEngine {
    store: ProxyStore,
    coordinator: Coordinator,
    breaker: CircuitBreaker,
    strategy: RotationStrategy,
    weights: HashMap<String, f64>,
    sticky_ttl: Duration,
}

impl RotationEngine {
    /// Creates an engine with the given strategy and breaker.
    pub fn new(
        store: ProxyStore,
        coordinator: Coordinator,
        breaker: CircuitBreaker,
        strategy: RotationStrategy,
    ) -> Self {
        Self {
            store,
            coordinator,
            breaker,
            strategy,
            weights: HashMap::new(),
            sticky_ttl: Duration::from_secs(300),
        }
    }

    /// Sets the configured weight overrides (keyed by label/host).
    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Sets how long a sticky-session pin lives.
    pub fn with_sticky_ttl(mut self, ttl: Duration) -> Self {
        self.sticky_ttl = ttl;
        self
    }

    /// Returns the active strategy.
    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    fn breaker_resource(proxy_id: i64) -> String {
        format!("proxy:{}", proxy_id)
    }

    /// Fetches selectable proxies and filters out those with an open breaker.
    async fn fetch_candidates(&self) -> Result<Vec<Proxy>, EngineError> {
        let mut candidates = self.store.fetch_selectable().await?;

        let mut gated = Vec::with_capacity(candidates.len());
        for proxy in candidates.drain(..) {
            if self
                .breaker
                .is_open(&Self::breaker_resource(proxy.id))
                .await?
            {
                debug!(proxy_id = proxy.id, "Skipping proxy with open breaker");
                continue;
            }
            gated.push(proxy);
        }

        Ok(gated)
    }

    /// Selects a proxy for the given affinity key (usually the job id).
    ///
    /// Returns `None` when no proxy is currently selectable: the fleet is
    /// empty, everything is inactive/cooling down, or every breaker is open.
    /// Selection runs under a best-effort advisory lock so the round-robin
    /// cursor and sticky pins do not interleave across instances; if the
    /// lock cannot be taken the selection proceeds without it.
    pub async fn acquire(&self, affinity: Option<&str>) -> Result<Option<Proxy>, EngineError> {
        let guard = self
            .coordinator
            .try_lock("select_proxy", SELECT_LOCK_TTL)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Proxy selection lock unavailable, proceeding unlocked");
                None
            });

        let result = self.acquire_inner(affinity).await;

        if let Some(guard) = guard {
            if let Err(e) = guard.release().await {
                warn!(error = %e, "Failed to release proxy selection lock");
            }
        }

        result
    }

    async fn acquire_inner(&self, affinity: Option<&str>) -> Result<Option<Proxy>, EngineError> {
        let candidates = self.fetch_candidates().await?;
        if candidates.is_empty() {
            warn!("No selectable proxies available");
            return Ok(None);
        }

        let idx = select_index(
            self.strategy,
            &candidates,
            &self.coordinator,
            &self.weights,
            affinity,
            self.sticky_ttl,
        )
        .await?;

        let proxy = candidates[idx].clone();
        self.store.touch_selected(proxy.id).await?;
        metrics::record_proxy_selection(self.strategy.as_str());

        debug!(
            proxy_id = proxy.id,
            host = %proxy.host,
            strategy = %self.strategy,
            "Selected proxy"
        );

        Ok(Some(proxy))
    }

    /// Records the outcome of a request made through a proxy.
    ///
    /// On success the breaker closes and the stored health metrics improve.
    /// On failure the breaker accumulates; when it trips, the proxy goes on
    /// cooldown for the breaker's cooldown window.
    pub async fn report_outcome(
        &self,
        proxy_id: i64,
        success: bool,
        latency_ms: Option<f64>,
    ) -> Result<(), EngineError> {
        let resource = Self::breaker_resource(proxy_id);

        if success {
            self.breaker.record_success(&resource).await?;
            self.store.record_success(proxy_id, latency_ms).await?;
            return Ok(());
        }

        let opened = self.breaker.record_failure(&resource).await?;
        self.store
            .record_failure(proxy_id, opened, self.breaker.cooldown())
            .await?;

        if opened {
            metrics::record_breaker_open();
            info!(
                proxy_id = proxy_id,
                cooldown_secs = self.breaker.cooldown().as_secs(),
                "Circuit breaker opened for proxy"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_resource_key() {
        assert_eq!(RotationEngine::breaker_resource(42), "proxy:42");
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Storage(DatabaseError::NotFound("proxy 9".to_string()));
        assert!(err.to_string().contains("proxy 9"));
    }
}
