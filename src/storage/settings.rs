//! Durable key-value settings.
//!
//! Backs the operator pause flag, the scheduler heartbeat, and periodic
//! stats snapshots. Values are plain text; structured values go through
//! JSON.

use chrono::Utc;
use sqlx::{PgPool, Row};

use super::database::DatabaseError;

/// Setting key for the operator pause flag.
pub const KEY_PAUSED: &str = "scheduler_paused";
/// Setting key for the liveness heartbeat timestamp.
pub const KEY_HEARTBEAT: &str = "scheduler_heartbeat";
/// Setting key for the periodic stats snapshot.
pub const KEY_STATS: &str = "scheduler_stats";

/// Store for the `settings` table.
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    /// Creates a new settings store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reads a setting value.
    pub async fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    /// Writes a setting value, creating or replacing it.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether the operator pause flag is set. A missing flag means running.
    pub async fn is_paused(&self) -> Result<bool, DatabaseError> {
        Ok(self
            .get(KEY_PAUSED)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    /// Sets or clears the operator pause flag.
    pub async fn set_paused(&self, paused: bool) -> Result<(), DatabaseError> {
        self.set(KEY_PAUSED, if paused { "true" } else { "false" })
            .await
    }

    /// Writes the liveness heartbeat and a stats snapshot.
    pub async fn heartbeat(&self, stats: &serde_json::Value) -> Result<(), DatabaseError> {
        self.set(KEY_HEARTBEAT, &Utc::now().to_rfc3339()).await?;
        self.set(KEY_STATS, &stats.to_string()).await?;
        Ok(())
    }
}
