//! Per-scope seen-URL dedup set.
//!
//! Membership checks go to the coordination store (fast, per-crawl scope);
//! every marked URL is also mirrored, best-effort, into the durable
//! `seen_urls` table for cross-run dedup. A mirror failure is logged and
//! swallowed: losing it only risks a re-visit, never corrupts job state.

use sqlx::PgPool;
use tracing::warn;

use crate::urlnorm;

use super::{CoordinationError, Coordinator};

/// Errors from seen-set operations.
#[derive(Debug, thiserror::Error)]
pub enum SeenError {
    /// Coordination-store operation failed.
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// The URL could not be parsed for normalization.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Seen-URL set over Redis with a durable Postgres mirror.
#[derive(Clone)]
pub struct SeenUrls {
    coordinator: Coordinator,
    pool: Option<PgPool>,
}

impl SeenUrls {
    /// Creates a seen-set without a durable mirror.
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            pool: None,
        }
    }

    /// Attaches a durable mirror.
    pub fn with_mirror(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    fn set_key(scope: Option<i64>) -> String {
        match scope {
            Some(job_id) => format!("seen:{}", job_id),
            None => "seen:global".to_string(),
        }
    }

    /// Whether a URL (after normalization) was already seen in this scope.
    pub async fn is_seen(&self, url: &str, scope: Option<i64>) -> Result<bool, SeenError> {
        let normalized = urlnorm::normalize(url)?;
        Ok(self
            .coordinator
            .sismember_raw(&Self::set_key(scope), &normalized)
            .await?)
    }

    /// Marks a URL as seen in this scope.
    ///
    /// Returns `true` if the URL was new to the scope. The durable mirror is
    /// written afterwards and never fails the call.
    pub async fn mark_seen(&self, url: &str, scope: Option<i64>) -> Result<bool, SeenError> {
        let normalized = urlnorm::normalize(url)?;
        let added = self
            .coordinator
            .sadd_raw(&Self::set_key(scope), &normalized)
            .await?;

        if let Some(ref pool) = self.pool {
            let result = sqlx::query(
                r#"
                INSERT INTO seen_urls (url, normalized_url)
                VALUES ($1, $2)
                ON CONFLICT (url) DO UPDATE SET last_seen_at = NOW()
                "#,
            )
            .bind(url)
            .bind(&normalized)
            .execute(pool)
            .await;

            if let Err(e) = result {
                warn!(url = %url, error = %e, "Failed to mirror seen URL to database");
            }
        }

        Ok(added)
    }
}
