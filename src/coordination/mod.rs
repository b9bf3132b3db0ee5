//! Distributed coordination primitives on the shared Redis store.
//!
//! Everything in here is ephemeral and best-effort: TTL-bound keys used to
//! avoid races and duplicated work across scheduler processes, never a
//! source of durable truth. The relational store remains authoritative for
//! all job and proxy state.
//!
//! Key layout (all prefixed with the configured namespace):
//!
//! - `{ns}:lock:{name}`: tokened advisory locks
//! - `{ns}:counter:{name}`: atomic counters
//! - `{ns}:cache:{key}`: short-TTL cached values
//! - `{ns}:seen:{scope}`: per-scope dedup sets of normalized URLs
//! - `{ns}:cb:{resource}:*`: circuit-breaker state
//! - `{ns}:sticky:{scope}` / `{ns}:rr:index`: rotation-strategy state

pub mod breaker;
pub mod lock;
pub mod seen;

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

pub use breaker::{BreakerState, CircuitBreaker};
pub use lock::LockGuard;
pub use seen::SeenUrls;

/// Errors from coordination-store operations.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Handle to the shared coordination store.
///
/// Cheap to clone: the underlying `ConnectionManager` multiplexes one
/// reconnecting connection.
#[derive(Clone)]
pub struct Coordinator {
    conn: ConnectionManager,
    namespace: String,
}

impl Coordinator {
    /// Connects to Redis and returns a namespaced coordinator.
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self, CoordinationError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoordinationError::ConnectionFailed(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoordinationError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(conn, namespace))
    }

    /// Creates a coordinator from an existing connection manager.
    pub fn from_connection(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
        }
    }

    /// Returns the namespaced form of a key suffix.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    /// Atomically increments a named counter and returns the new value.
    pub async fn incr_counter(&self, name: &str, amount: i64) -> Result<i64, CoordinationError> {
        self.incr_raw(&format!("counter:{}", name), amount).await
    }

    /// Reads a named counter (0 if absent).
    pub async fn get_counter(&self, name: &str) -> Result<i64, CoordinationError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(self.key(&format!("counter:{}", name))).await?;
        Ok(value.unwrap_or(0))
    }

    /// Reads a cached value.
    pub async fn cache_get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.get_raw(&format!("cache:{}", key)).await
    }

    /// Stores a cached value with a TTL.
    pub async fn cache_set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        self.set_ex_raw(&format!("cache:{}", key), value, ttl).await
    }

    // Low-level namespaced operations shared by the lock, breaker, seen-set
    // and rotation code. Suffixes are namespaced here, never by callers.

    pub(crate) async fn get_raw(&self, suffix: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(self.key(suffix)).await?)
    }

    pub(crate) async fn set_ex_raw(
        &self,
        suffix: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(suffix), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    /// SET NX EX: returns true if the key was absent and is now set.
    pub(crate) async fn set_nx_ex_raw(
        &self,
        suffix: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(suffix))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    pub(crate) async fn incr_raw(
        &self,
        suffix: &str,
        amount: i64,
    ) -> Result<i64, CoordinationError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(self.key(suffix), amount).await?)
    }

    /// Remaining TTL in seconds; negative when the key is absent or
    /// has no expiry.
    pub(crate) async fn ttl_raw(&self, suffix: &str) -> Result<i64, CoordinationError> {
        let mut conn = self.conn.clone();
        Ok(conn.ttl(self.key(suffix)).await?)
    }

    pub(crate) async fn expire_raw(
        &self,
        suffix: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(self.key(suffix), ttl.as_secs().max(1) as i64)
            .await?;
        Ok(())
    }

    pub(crate) async fn del_raw(&self, suffix: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(suffix)).await?;
        Ok(())
    }

    pub(crate) async fn sadd_raw(
        &self,
        suffix: &str,
        member: &str,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(self.key(suffix), member).await?;
        Ok(added > 0)
    }

    pub(crate) async fn sismember_raw(
        &self,
        suffix: &str,
        member: &str,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(self.key(suffix), member).await?)
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}
