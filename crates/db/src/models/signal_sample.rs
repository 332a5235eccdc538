//! Per-topic volume history collected across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalSampleError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSampleRecord {
    pub id: i64,
    pub topic: String,
    pub observed_at: DateTime<Utc>,
    pub volume: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSignalSample {
    pub topic: String,
    pub observed_at: DateTime<Utc>,
    pub volume: f64,
}

impl SignalSampleRecord {
    /// Insert samples in one transaction, skipping any already recorded.
    /// Returns how many were new.
    pub async fn record_many(
        pool: &SqlitePool,
        samples: &[NewSignalSample],
    ) -> Result<u64, SignalSampleError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut tx = pool.begin().await?;
        let mut inserted = 0;
        for sample in samples {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO signal_samples (topic, observed_at, volume, recorded_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&sample.topic)
            .bind(sample.observed_at)
            .bind(sample.volume)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        tracing::debug!("[DB] Recorded {} of {} signal sample(s)", inserted, samples.len());
        Ok(inserted)
    }

    /// Samples observed in `[start, end]`, oldest first.
    pub async fn find_in_window(
        pool: &SqlitePool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Self>, SignalSampleError> {
        let records = sqlx::query_as::<_, SignalSampleRecord>(
            r#"
            SELECT id, topic, observed_at, volume, recorded_at
            FROM signal_samples
            WHERE observed_at >= ?1 AND observed_at <= ?2
            ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(records)
    }
}
