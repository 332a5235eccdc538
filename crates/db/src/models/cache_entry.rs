//! Stage cache rows keyed by input fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheEntryError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// One stored stage output. Never updated in place.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryRecord {
    pub id: i64,
    pub fingerprint: String,
    pub stage_key: String,
    pub value_json: String,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCacheEntry {
    pub fingerprint: String,
    pub stage_key: String,
    pub value_json: String,
    pub provider: Option<String>,
}

impl CacheEntryRecord {
    /// Most recent entry stored under `fingerprint`, if any.
    pub async fn find_latest(
        pool: &SqlitePool,
        fingerprint: &str,
    ) -> Result<Option<Self>, CacheEntryError> {
        let entry = sqlx::query_as::<_, CacheEntryRecord>(
            r#"
            SELECT id, fingerprint, stage_key, value_json, provider, created_at
            FROM cache_entries
            WHERE fingerprint = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;

        Ok(entry)
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateCacheEntry,
    ) -> Result<Self, CacheEntryError> {
        let entry = sqlx::query_as::<_, CacheEntryRecord>(
            r#"
            INSERT INTO cache_entries (fingerprint, stage_key, value_json, provider, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, fingerprint, stage_key, value_json, provider, created_at
            "#,
        )
        .bind(&data.fingerprint)
        .bind(&data.stage_key)
        .bind(&data.value_json)
        .bind(&data.provider)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(entry)
    }

    pub async fn count_for_stage(pool: &SqlitePool, stage_key: &str) -> Result<i64, CacheEntryError> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM cache_entries WHERE stage_key = ?1"#)
                .bind(stage_key)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }
}
