//! Signal aggregation: fetch, de-duplicate, score and rank trend observations.

use std::{cmp::Ordering, sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::{
    brief::{GoalBrief, LookbackWindow},
    config::{PortalConfig, SignalsConfig},
    text::similarity,
    PortalError, Result,
};

mod source;

pub use source::{RawSignal, SerpApiSource, SourceError, TrendSource};

/// A normalized observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub source: String,
    pub topic: String,
    pub observed_at: DateTime<Utc>,
    pub volume: f64,
    /// Volume per hour of age (age floored at one hour).
    pub velocity: f64,
}

/// A volume reading, used for trend direction downstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSample {
    pub observed_at: DateTime<Utc>,
    pub volume: f64,
}

/// A ranked candidate topic built from one or more signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub topic: String,
    pub score: f64,
    /// The kept signal first, then the near-duplicates folded into it.
    pub signal_ids: Vec<String>,
    pub sources: Vec<String>,
    pub first_observed: DateTime<Utc>,
    pub samples: Vec<VolumeSample>,
}

pub struct SignalAggregator {
    source: Arc<dyn TrendSource>,
    config: Arc<PortalConfig>,
}

impl SignalAggregator {
    pub fn new(source: Arc<dyn TrendSource>, config: Arc<PortalConfig>) -> Self {
        Self { source, config }
    }

    /// Ranked opportunities for `brief`, evaluated at the current time.
    pub async fn collect(&self, brief: &GoalBrief) -> Result<Vec<Opportunity>> {
        self.collect_at(brief, Utc::now()).await
    }

    /// Ranked opportunities for `brief` as of `now`. Deterministic for a given source reply.
    pub async fn collect_at(&self, brief: &GoalBrief, now: DateTime<Utc>) -> Result<Vec<Opportunity>> {
        let settings = &self.config.signals;
        let window = brief.lookback_window(now, settings.default_lookback_hours);
        let topic = brief.search_topic();

        let raw = self.fetch(topic, window).await?;
        let fetched = raw.len();
        let opportunities = rank_signals(raw, window, now, settings);

        tracing::info!(
            "[SIGNALS] '{}': {} raw signal(s) -> {} opportunity(ies)",
            topic,
            fetched,
            opportunities.len()
        );
        Ok(opportunities)
    }

    async fn fetch(&self, topic: &str, window: LookbackWindow) -> Result<Vec<RawSignal>> {
        let settings = &self.config.signals;
        let timeout = settings.fetch_timeout();
        (|| async {
            match tokio::time::timeout(timeout, self.source.query(topic, window)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Unavailable(format!(
                    "no answer within {}ms",
                    timeout.as_millis()
                ))),
            }
        })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(settings.fetch_backoff_ms))
                    .with_max_delay(Duration::from_millis(settings.fetch_backoff_ms.saturating_mul(16)))
                    .with_max_times(settings.fetch_retries),
            )
            .when(|e| e.should_retry())
            .notify(|err: &SourceError, dur: Duration| {
                tracing::warn!(
                    "[SIGNALS] {} query failed, retrying after {:.2}s: {}",
                    self.source.name(),
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
            .map_err(|err| PortalError::SignalSourceUnavailable(format!("{}: {}", self.source.name(), err)))
    }
}

/// Normalize, de-duplicate, score and rank raw observations.
pub fn rank_signals(
    raw: Vec<RawSignal>,
    window: LookbackWindow,
    now: DateTime<Utc>,
    settings: &SignalsConfig,
) -> Vec<Opportunity> {
    let signals: Vec<Signal> = raw
        .into_iter()
        .filter(|r| window.contains(r.timestamp))
        .filter_map(|r| normalize(r, now))
        .collect();

    let clusters = dedupe(signals, settings.dedup_threshold);
    if clusters.is_empty() {
        return Vec::new();
    }

    let max_volume = clusters.iter().map(|c| c.kept.volume).fold(0.0, f64::max);
    let max_velocity = clusters.iter().map(|c| c.kept.velocity).fold(0.0, f64::max);
    let ratio = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };

    let mut opportunities: Vec<Opportunity> = clusters
        .into_iter()
        .map(|cluster| {
            let kept = &cluster.kept;
            let age_hours = hours_between(kept.observed_at, now);
            let recency = 0.5_f64.powf(age_hours / settings.recency_half_life_hours);
            let score = settings.recency_weight * recency
                + settings.volume_weight * ratio(kept.volume, max_volume)
                + settings.velocity_weight * ratio(kept.velocity, max_velocity);
            cluster.into_opportunity(score)
        })
        .collect();

    opportunities.sort_by(compare_opportunities);
    opportunities.truncate(settings.top_k);
    opportunities
}

/// Score descending, then earliest observation, then id.
pub fn compare_opportunities(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.first_observed.cmp(&b.first_observed))
        .then_with(|| a.id.cmp(&b.id))
}

fn normalize(raw: RawSignal, now: DateTime<Utc>) -> Option<Signal> {
    let topic = raw.text.split_whitespace().collect::<Vec<_>>().join(" ");
    if topic.is_empty() {
        return None;
    }
    let volume = if raw.volume_metric.is_finite() {
        raw.volume_metric.max(0.0)
    } else {
        0.0
    };
    let velocity = volume / hours_between(raw.timestamp, now).max(1.0);

    let mut hasher = Sha256::new();
    hasher.update(raw.source_name.as_bytes());
    hasher.update([0x1f]);
    hasher.update(topic.as_bytes());
    hasher.update([0x1f]);
    hasher.update(raw.timestamp.to_rfc3339().as_bytes());
    let id = hex::encode(hasher.finalize())[..16].to_string();

    Some(Signal {
        id,
        source: raw.source_name,
        topic,
        observed_at: raw.timestamp,
        volume,
        velocity,
    })
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_seconds().max(0)) as f64 / 3600.0
}

struct SignalCluster {
    kept: Signal,
    folded: Vec<Signal>,
}

impl SignalCluster {
    fn into_opportunity(self, score: f64) -> Opportunity {
        let members: Vec<&Signal> = std::iter::once(&self.kept).chain(self.folded.iter()).collect();

        let mut sources: Vec<String> = members.iter().map(|s| s.source.clone()).collect();
        sources.sort();
        sources.dedup();

        let first_observed = members
            .iter()
            .map(|s| s.observed_at)
            .min()
            .unwrap_or(self.kept.observed_at);

        let mut samples: Vec<VolumeSample> = members
            .iter()
            .map(|s| VolumeSample {
                observed_at: s.observed_at,
                volume: s.volume,
            })
            .collect();
        samples.sort_by_key(|s| s.observed_at);

        Opportunity {
            id: format!("opp-{}", self.kept.id),
            topic: self.kept.topic.clone(),
            score,
            signal_ids: members.iter().map(|s| s.id.clone()).collect(),
            sources,
            first_observed,
            samples,
        }
    }
}

/// Fold near-duplicate topics together, keeping the highest-volume instance.
fn dedupe(mut signals: Vec<Signal>, threshold: f64) -> Vec<SignalCluster> {
    signals.sort_by(|a, b| {
        b.volume
            .total_cmp(&a.volume)
            .then_with(|| a.observed_at.cmp(&b.observed_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut clusters: Vec<SignalCluster> = Vec::new();
    for signal in signals {
        match clusters
            .iter_mut()
            .find(|c| similarity(&c.kept.topic, &signal.topic) >= threshold)
        {
            Some(cluster) => cluster.folded.push(signal),
            None => clusters.push(SignalCluster {
                kept: signal,
                folded: Vec::new(),
            }),
        }
    }
    clusters
}
