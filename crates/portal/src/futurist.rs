//! Futurist scanner: cluster opportunities into forward-looking themes.
//!
//! Clustering is greedy single-link in rank order, so the same opportunities
//! always produce the same clusters. Naming goes through the gateway and is
//! best-effort: a cluster whose name cannot be produced keeps its identifier
//! and is reported as unnamed. Trend direction uses the volume history recorded
//! by earlier collections as well as the samples carried by the opportunities.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::{
    brief::LookbackWindow,
    config::PortalConfig,
    gateway::{roles, InvokeOptions, ProviderGateway, ProviderPrompt},
    signals::{Opportunity, VolumeSample},
    store::{Computed, PersistenceStore},
    text::{similarity, string_field},
};

const NAME_STAGE: &str = "futurist.theme_name";
const MAX_NAME_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Stable,
    Fading,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Rising => "rising",
            TrendDirection::Stable => "stable",
            TrendDirection::Fading => "fading",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    pub name: String,
    /// False when naming failed and `name` is the cluster identifier.
    pub named: bool,
    pub direction: TrendDirection,
    /// Least-squares volume slope per hour, relative to mean volume.
    pub relative_slope: f64,
    pub opportunity_ids: Vec<String>,
    pub topics: Vec<String>,
    pub window: LookbackWindow,
}

#[derive(Debug, Serialize)]
struct NameRequest<'a> {
    topics: &'a [String],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThemeName {
    name: String,
}

pub struct FuturistScanner {
    gateway: Arc<ProviderGateway>,
    store: Arc<PersistenceStore>,
    config: Arc<PortalConfig>,
}

impl FuturistScanner {
    pub fn new(gateway: Arc<ProviderGateway>, store: Arc<PersistenceStore>, config: Arc<PortalConfig>) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    /// Group `opportunities` (in rank order) into themes over `window`.
    ///
    /// Never fails: naming problems leave the theme unnamed.
    pub async fn scan(&self, opportunities: &[Opportunity], window: LookbackWindow) -> Vec<Theme> {
        let threshold = self.config.futurist.cluster_threshold;
        let clusters = cluster(opportunities, threshold);
        let history = match self.store.signal_history(window).await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!("[FUTURIST] Signal history unavailable: {}", err);
                Vec::new()
            }
        };
        let history = &history;

        let themes = clusters.into_iter().map(|members| async move {
            let topics: Vec<String> = members.iter().map(|o| o.topic.clone()).collect();
            let opportunity_ids: Vec<String> = members.iter().map(|o| o.id.clone()).collect();
            let id = cluster_id(&opportunity_ids);

            let samples = cluster_samples(&members, history, threshold, window);
            let relative_slope = relative_slope(&samples, window);
            let direction = classify(relative_slope, self.config.futurist.trend_band);

            let (name, named) = match self.name_cluster(&topics).await {
                Some(name) => (name, true),
                None => (id.clone(), false),
            };

            Theme {
                id,
                name,
                named,
                direction,
                relative_slope,
                opportunity_ids,
                topics,
                window,
            }
        });

        let themes = futures::future::join_all(themes).await;
        tracing::info!(
            "[FUTURIST] {} opportunity(ies) -> {} theme(s), {} unnamed",
            opportunities.len(),
            themes.len(),
            themes.iter().filter(|t| !t.named).count()
        );
        themes
    }

    async fn name_cluster(&self, topics: &[String]) -> Option<String> {
        let result = self
            .store
            .get_or_compute(NAME_STAGE, &NameRequest { topics }, || async {
                let prompt = ProviderPrompt::new(
                    "You are a futurist. Name the emerging theme that connects a set of trending \
                     topics. Reply as JSON: {\"name\": \"<theme name, at most 8 words>\"}.",
                    format!(
                        "Trending topics:\n{}",
                        topics.iter().map(|t| format!("- {t}")).collect::<Vec<_>>().join("\n")
                    ),
                )
                .json();
                let response = self
                    .gateway
                    .invoke(roles::FUTURIST, &prompt, &InvokeOptions::default())
                    .await?;
                let name = response
                    .reply
                    .structured()
                    .and_then(|fields| string_field(&fields, "name"))
                    .or_else(|| response.reply.text.lines().next().map(|l| l.trim().to_string()))
                    .unwrap_or_default();
                Ok(Computed::from_provider(
                    ThemeName { name: clean_name(&name) },
                    response.provider,
                ))
            })
            .await;

        match result {
            Ok(ThemeName { name }) if !name.is_empty() => Some(name),
            Ok(_) => {
                tracing::warn!("[FUTURIST] Provider returned an empty theme name");
                None
            }
            Err(err) => {
                tracing::warn!("[FUTURIST] Theme naming failed: {}", err);
                None
            }
        }
    }
}

/// Greedy single-link clustering in input order.
fn cluster(opportunities: &[Opportunity], threshold: f64) -> Vec<Vec<&Opportunity>> {
    let mut clusters: Vec<Vec<&Opportunity>> = Vec::new();
    for opportunity in opportunities {
        let joined = clusters.iter_mut().find(|members| {
            members
                .iter()
                .any(|m| similarity(&m.topic, &opportunity.topic) >= threshold)
        });
        match joined {
            Some(members) => members.push(opportunity),
            None => clusters.push(vec![opportunity]),
        }
    }
    clusters
}

/// Member samples plus recorded history for topics close to any member, each
/// point counted once.
fn cluster_samples(
    members: &[&Opportunity],
    history: &[(String, VolumeSample)],
    threshold: f64,
    window: LookbackWindow,
) -> Vec<VolumeSample> {
    let recorded = history
        .iter()
        .filter(|(topic, _)| members.iter().any(|m| similarity(topic, &m.topic) >= threshold))
        .map(|(_, sample)| *sample);

    let mut samples: Vec<VolumeSample> = Vec::new();
    for sample in members.iter().flat_map(|o| o.samples.iter().copied()).chain(recorded) {
        let seen = samples
            .iter()
            .any(|s| s.observed_at == sample.observed_at && s.volume == sample.volume);
        if window.contains(sample.observed_at) && !seen {
            samples.push(sample);
        }
    }
    samples
}

fn cluster_id(opportunity_ids: &[String]) -> String {
    let mut sorted = opportunity_ids.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    for id in &sorted {
        hasher.update(id.as_bytes());
        hasher.update([0x1f]);
    }
    format!("cluster-{}", &hex::encode(hasher.finalize())[..10])
}

fn clean_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '#' || c == '*').trim();
    trimmed.chars().take(MAX_NAME_CHARS).collect::<String>().trim().to_string()
}

/// Least-squares slope of volume over hours since window start, divided by mean volume.
fn relative_slope(samples: &[VolumeSample], window: LookbackWindow) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| {
            let hours = (s.observed_at - window.start).num_seconds() as f64 / 3600.0;
            (hours, s.volume)
        })
        .collect();

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let var_x: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if var_x == 0.0 || mean_y <= 0.0 {
        return 0.0;
    }
    let cov: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    (cov / var_x) / mean_y
}

fn classify(relative_slope: f64, band: f64) -> TrendDirection {
    if relative_slope > band {
        TrendDirection::Rising
    } else if relative_slope < -band {
        TrendDirection::Fading
    } else {
        TrendDirection::Stable
    }
}
