use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{FallEvent, FallLog};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event log query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only log of fall events, keyed by user. Callers treat append
/// failures as non-fatal; the engine logs them and keeps going.
pub trait EventStore: Send + Sync {
    fn append(&self, user_id: &str, event: &FallEvent) -> BoxFuture<'static, Result<(), StoreError>>;
}

/// SQLite-backed event log, Milo's local on-device history.
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Connect and make sure the log table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fall_events (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                acceleration_g REAL,
                inactive_duration_ms INTEGER,
                confidence TEXT,
                velocity_change REAL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Most recent events, newest first. Drives the dashboard event log.
    pub async fn recent(&self, limit: i64) -> Result<Vec<FallLog>, StoreError> {
        let logs = sqlx::query_as::<_, FallLog>(
            "SELECT id, user_id, kind, recorded_at, acceleration_g,
                    inactive_duration_ms, confidence, velocity_change
             FROM fall_events
             ORDER BY recorded_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Retention policy: the log keeps a bounded number of days of history.
    pub async fn prune_older_than(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let result = sqlx::query("DELETE FROM fall_events WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, user_id: &str, event: &FallEvent) -> BoxFuture<'static, Result<(), StoreError>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let event = event.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO fall_events (id, user_id, kind, recorded_at, acceleration_g,
                                          inactive_duration_ms, confidence, velocity_change)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(event.kind.as_str())
            .bind(event.timestamp)
            .bind(event.acceleration_g)
            .bind(event.inactive_duration_ms.map(|ms| ms as i64))
            .bind(event.confidence.map(|c| c.as_str()))
            .bind(event.velocity_change)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }
}
