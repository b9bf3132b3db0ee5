//! Job queue persistence.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` inside a single transaction so
//! concurrent scheduler instances never hand the same job to two workers.
//! Status transitions are single UPDATE statements keyed by id.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::scheduler::job::{CrawlParams, Job, JobStatus, NewJob};

use super::database::DatabaseError;

const JOB_COLUMNS: &str = "id, url, status, priority, retry_count, max_retries, \
     next_retry_at, last_error, keywords, match_mode, min_matches, \
     country_filter, lang_filter, use_js, max_pages_per_domain, session_id, \
     created_at, updated_at";

/// Store for the `queue` table.
#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    /// Creates a new job store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new pending job and returns its id.
    pub async fn insert(&self, job: NewJob) -> Result<i64, DatabaseError> {
        let keywords = serde_json::to_value(&job.params.keywords)?;

        let row = sqlx::query(
            r#"
            INSERT INTO queue (
                url, priority, max_retries, keywords, match_mode, min_matches,
                country_filter, lang_filter, use_js, max_pages_per_domain, session_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&job.url)
        .bind(job.priority)
        .bind(job.max_retries)
        .bind(keywords)
        .bind(job.params.match_mode.as_str())
        .bind(job.params.min_matches)
        .bind(&job.params.country_filter)
        .bind(&job.params.lang_filter)
        .bind(job.params.use_js)
        .bind(job.params.max_pages_per_domain)
        .bind(job.session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    /// Claims the next eligible pending job, transitioning it to
    /// `in_progress`. Returns `None` when the queue has nothing claimable.
    ///
    /// Eligibility: pending, not soft-deleted, retry budget remaining, and
    /// past any backoff gate. Ordering: priority, then fewest retries, then
    /// insertion order. `SKIP LOCKED` lets concurrent claimers pass over rows
    /// another transaction is already claiming.
    pub async fn claim_next(&self) -> Result<Option<Job>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM queue
            WHERE status = 'pending'
              AND deleted_at IS NULL
              AND retry_count < max_retries
              AND (next_retry_at IS NULL OR next_retry_at <= NOW())
            ORDER BY priority ASC, retry_count ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let mut job = map_job_row(&row)?;

        sqlx::query("UPDATE queue SET status = 'in_progress', updated_at = NOW() WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        job.status = JobStatus::InProgress;
        Ok(Some(job))
    }

    /// Marks a job as successfully completed.
    pub async fn mark_done(&self, id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE queue SET status = 'done', last_error = NULL, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Re-queues a failed job as pending with an incremented retry count and
    /// a backoff gate.
    pub async fn mark_retry(
        &self,
        id: i64,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE queue
            SET status = 'pending',
                retry_count = retry_count + 1,
                next_retry_at = $2,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks a job terminally failed. The retry count is still incremented
    /// so the row records how many attempts it consumed; `next_retry_at` is
    /// left untouched since failed rows are never reclaimed.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE queue
            SET status = 'failed',
                retry_count = retry_count + 1,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Force-fails in-progress jobs whose claim timestamp is older than the
    /// cutoff. Catches jobs orphaned by a crashed scheduler instance.
    /// Returns the number of jobs swept.
    pub async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE queue
            SET status = 'failed',
                retry_count = retry_count + 1,
                last_error = 'swept: in_progress past deadline',
                updated_at = NOW()
            WHERE status = 'in_progress'
              AND deleted_at IS NULL
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft-deletes terminal jobs older than the retention window. Returns
    /// the number of rows retired.
    pub async fn gc_terminal(&self, retention_days: i64) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);

        let result = sqlx::query(
            r#"
            UPDATE queue
            SET deleted_at = NOW()
            WHERE status IN ('done', 'failed')
              AND deleted_at IS NULL
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Returns per-status counts over live (non-deleted) rows.
    pub async fn counts(&self) -> Result<QueueCounts, DatabaseError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM queue WHERE deleted_at IS NULL GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match status.as_str() {
                "pending" => counts.pending = n,
                "in_progress" => counts.in_progress = n,
                "done" => counts.done = n,
                "failed" => counts.failed = n,
                _ => {}
            }
        }

        Ok(counts)
    }

    /// Fetches a single job by id.
    pub async fn get(&self, id: i64) -> Result<Job, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM queue WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("job {}", id)))?;

        map_job_row(&row)
    }
}

/// Live-row counts per status.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub done: i64,
    pub failed: i64,
}

fn map_job_row(row: &PgRow) -> Result<Job, DatabaseError> {
    let status_raw: String = row.get("status");
    let status = status_raw
        .parse::<JobStatus>()
        .map_err(DatabaseError::Decode)?;

    let keywords_raw: serde_json::Value = row.get("keywords");
    let keywords: Vec<String> = serde_json::from_value(keywords_raw)?;

    let match_mode_raw: String = row.get("match_mode");
    let match_mode = match_mode_raw.parse().map_err(DatabaseError::Decode)?;

    Ok(Job {
        id: row.get("id"),
        url: row.get("url"),
        status,
        priority: row.get("priority"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        next_retry_at: row.get("next_retry_at"),
        last_error: row.get("last_error"),
        params: CrawlParams {
            keywords,
            match_mode,
            min_matches: row.get("min_matches"),
            country_filter: row.get("country_filter"),
            lang_filter: row.get("lang_filter"),
            use_js: row.get("use_js"),
            max_pages_per_domain: row.get("max_pages_per_domain"),
        },
        session_id: row.get("session_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_counts_default_is_zero() {
        let counts = QueueCounts::default();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.in_progress, 0);
        assert_eq!(counts.done, 0);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn test_counts_serialize() {
        let counts = QueueCounts {
            pending: 4,
            in_progress: 1,
            done: 10,
            failed: 2,
        };
        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json["pending"], 4);
        assert_eq!(json["failed"], 2);
    }
}
