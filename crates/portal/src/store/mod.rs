//! Persistence store: fingerprinted result cache and the run ledger.
//!
//! Results are memoized in two layers. A moka hot cache sits in front of the
//! append-only `cache_entries` table and provides single-flight: concurrent
//! requests for the same fingerprint share one computation, and a failed
//! computation is handed to every waiter without being persisted.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use db::{
    models::{
        cache_entry::{CacheEntryRecord, CreateCacheEntry},
        run_ledger::{AppendRunRevision, RunLedgerError, RunLedgerRecord},
        signal_sample::{NewSignalSample, SignalSampleRecord},
    },
    DBService,
};
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::{
    brief::LookbackWindow,
    config::CacheConfig,
    signals::{Opportunity, VolumeSample},
    text::normalize_topic,
    wizard::{CampaignRun, RunStatus},
    PortalError, Result,
};

mod fingerprint;

pub use fingerprint::fingerprint;

/// A freshly computed value and the provider that produced it, if any.
#[derive(Debug, Clone)]
pub struct Computed<T> {
    pub value: T,
    pub provider: Option<String>,
}

impl<T> Computed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            provider: None,
        }
    }

    pub fn from_provider(value: T, provider: impl Into<String>) -> Self {
        Self {
            value,
            provider: Some(provider.into()),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub lookups: u64,
    pub persisted_hits: u64,
    pub computations: u64,
}

pub struct PersistenceStore {
    db: DBService,
    hot: Cache<String, CachedValue>,
    ttl: Duration,
    lookups: AtomicU64,
    persisted_hits: AtomicU64,
    computations: AtomicU64,
}

impl PersistenceStore {
    pub fn new(db: DBService, config: &CacheConfig) -> Self {
        let hot = Cache::builder()
            .max_capacity(config.hot_capacity)
            .time_to_live(config.ttl())
            .build();

        Self {
            db,
            hot,
            ttl: config.ttl(),
            lookups: AtomicU64::new(0),
            persisted_hits: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            persisted_hits: self.persisted_hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }

    /// Return the cached result for `(stage_key, input)`, computing it at most once.
    ///
    /// Concurrent callers with the same fingerprint await a single `compute`.
    /// Expired or unreadable entries are treated as misses and superseded by a
    /// new row. A failed `compute` writes nothing and fails every waiter.
    pub async fn get_or_compute<I, O, F, Fut>(&self, stage_key: &str, input: &I, compute: F) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed<O>>>,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let key = fingerprint(stage_key, input)?;

        if let Some(entry) = self.hot.get(&key).await {
            if self.is_expired(entry.created_at) {
                self.hot.invalidate(&key).await;
            }
        }

        let entry = self
            .hot
            .try_get_with(key.clone(), self.load_or_compute::<O, _, _>(stage_key, &key, compute))
            .await
            .map_err(|err: Arc<PortalError>| (*err).clone())?;

        serde_json::from_value(entry.value).map_err(|e| {
            PortalError::CacheCorruption(format!("{stage_key}/{key}: {e}"))
        })
    }

    async fn load_or_compute<O, F, Fut>(&self, stage_key: &str, key: &str, compute: F) -> Result<CachedValue>
    where
        O: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed<O>>>,
    {
        if let Some(record) = CacheEntryRecord::find_latest(&self.db.pool, key).await? {
            match self.decode_persisted::<O>(&record) {
                Ok(Some(value)) => {
                    self.persisted_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("[STORE] {} hit for {}", stage_key, short(key));
                    return Ok(CachedValue {
                        value,
                        created_at: record.created_at,
                    });
                }
                Ok(None) => {
                    tracing::debug!("[STORE] {} entry for {} expired, recomputing", stage_key, short(key));
                }
                Err(err) => {
                    tracing::warn!("[STORE] {} - treating as miss", err);
                }
            }
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        let computed = compute().await?;
        let value = serde_json::to_value(&computed.value)?;

        let record = CacheEntryRecord::create(
            &self.db.pool,
            &CreateCacheEntry {
                fingerprint: key.to_string(),
                stage_key: stage_key.to_string(),
                value_json: value.to_string(),
                provider: computed.provider,
            },
        )
        .await?;
        tracing::debug!("[STORE] {} stored {}", stage_key, short(key));

        Ok(CachedValue {
            value,
            created_at: record.created_at,
        })
    }

    /// `Ok(None)` for an expired entry, `Err` for one that cannot be read back.
    fn decode_persisted<O: DeserializeOwned>(
        &self,
        record: &CacheEntryRecord,
    ) -> Result<Option<serde_json::Value>> {
        if self.is_expired(record.created_at) {
            return Ok(None);
        }
        let corrupt = |detail: String| {
            PortalError::CacheCorruption(format!("entry {} ({}): {}", record.id, record.stage_key, detail))
        };
        let value: serde_json::Value =
            serde_json::from_str(&record.value_json).map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_value::<O>(value.clone()).map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(value))
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Utc::now() - created_at > ttl
    }

    /// Append a ledger revision for `run`. Settled runs accept no further revisions.
    pub async fn record_run(&self, run: &CampaignRun) -> Result<i64> {
        if let Some(latest) = RunLedgerRecord::find_latest(&self.db.pool, run.id).await? {
            let settled = latest
                .status
                .parse::<RunStatus>()
                .map(|status| status.is_terminal())
                .unwrap_or(false);
            if settled {
                return Err(PortalError::RunSettled(run.id));
            }
        }

        let record = RunLedgerRecord::append(
            &self.db.pool,
            &AppendRunRevision {
                run_id: run.id,
                status: run.status.as_str().to_string(),
                stage: run.current_stage.as_str().to_string(),
                state_json: serde_json::to_string(run)?,
            },
        )
        .await?;
        Ok(record.revision)
    }

    /// Latest recorded state of a run.
    pub async fn load_run(&self, run_id: Uuid) -> Result<CampaignRun> {
        let record = RunLedgerRecord::find_latest(&self.db.pool, run_id)
            .await?
            .ok_or(PortalError::RunNotFound(run_id))?;
        Ok(serde_json::from_str(&record.state_json)?)
    }

    /// Every recorded revision of a run, oldest first.
    pub async fn run_history(&self, run_id: Uuid) -> Result<Vec<CampaignRun>> {
        let records = match RunLedgerRecord::history(&self.db.pool, run_id).await {
            Ok(records) => records,
            Err(RunLedgerError::NotFound) => return Err(PortalError::RunNotFound(run_id)),
            Err(err) => return Err(err.into()),
        };
        records
            .iter()
            .map(|record| serde_json::from_str(&record.state_json).map_err(PortalError::from))
            .collect()
    }
}

impl PersistenceStore {
    /// Remember the volume samples behind `opportunities`, keyed by normalized topic.
    /// Returns how many were not already known.
    pub async fn record_signal_samples(&self, opportunities: &[Opportunity]) -> Result<u64> {
        let samples: Vec<NewSignalSample> = opportunities
            .iter()
            .flat_map(|o| {
                let topic = normalize_topic(&o.topic);
                o.samples.iter().map(move |s| NewSignalSample {
                    topic: topic.clone(),
                    observed_at: s.observed_at,
                    volume: s.volume,
                })
            })
            .collect();
        Ok(SignalSampleRecord::record_many(&self.db.pool, &samples).await?)
    }

    /// Recorded samples observed inside `window`, oldest first.
    pub async fn signal_history(&self, window: LookbackWindow) -> Result<Vec<(String, VolumeSample)>> {
        let records = SignalSampleRecord::find_in_window(&self.db.pool, window.start, window.end).await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let sample = VolumeSample {
                    observed_at: r.observed_at,
                    volume: r.volume,
                };
                (r.topic, sample)
            })
            .collect())
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
