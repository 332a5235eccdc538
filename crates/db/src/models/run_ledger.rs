//! Append-only ledger of campaign run state, one revision per change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RunLedgerError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Run not found")]
    NotFound,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLedgerRecord {
    pub id: i64,
    pub run_id: Uuid,
    pub revision: i64,
    pub status: String,
    pub stage: String,
    pub state_json: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppendRunRevision {
    pub run_id: Uuid,
    pub status: String,
    pub stage: String,
    pub state_json: String,
}

impl RunLedgerRecord {
    /// Append the next revision for a run inside a single transaction.
    pub async fn append(
        pool: &SqlitePool,
        data: &AppendRunRevision,
    ) -> Result<Self, RunLedgerError> {
        let mut tx = pool.begin().await?;

        let next_revision: i64 = sqlx::query_scalar(
            r#"SELECT COALESCE(MAX(revision), 0) + 1 FROM run_ledger WHERE run_id = ?1"#,
        )
        .bind(data.run_id)
        .fetch_one(&mut *tx)
        .await?;

        let record = sqlx::query_as::<_, RunLedgerRecord>(
            r#"
            INSERT INTO run_ledger (run_id, revision, status, stage, state_json, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id, run_id, revision, status, stage, state_json, recorded_at
            "#,
        )
        .bind(data.run_id)
        .bind(next_revision)
        .bind(&data.status)
        .bind(&data.stage)
        .bind(&data.state_json)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            "[DB] Run {} revision {} recorded ({})",
            record.run_id,
            record.revision,
            record.status
        );

        Ok(record)
    }

    pub async fn find_latest(
        pool: &SqlitePool,
        run_id: Uuid,
    ) -> Result<Option<Self>, RunLedgerError> {
        let record = sqlx::query_as::<_, RunLedgerRecord>(
            r#"
            SELECT id, run_id, revision, status, stage, state_json, recorded_at
            FROM run_ledger
            WHERE run_id = ?1
            ORDER BY revision DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    pub async fn history(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Self>, RunLedgerError> {
        let records = sqlx::query_as::<_, RunLedgerRecord>(
            r#"
            SELECT id, run_id, revision, status, stage, state_json, recorded_at
            FROM run_ledger
            WHERE run_id = ?1
            ORDER BY revision ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(pool)
        .await?;

        if records.is_empty() {
            return Err(RunLedgerError::NotFound);
        }

        Ok(records)
    }
}
