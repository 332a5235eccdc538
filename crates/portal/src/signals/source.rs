//! Trend data sources.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{brief::LookbackWindow, config::SignalsConfig};

static RELATIVE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)\s+(minute|min|hour|day|week)s?\s+ago$").unwrap()
});

/// One raw observation as reported by a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawSignal {
    pub source_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub volume_metric: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl SourceError {
    pub fn should_retry(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::RateLimited)
    }
}

/// A source of trend observations for a topic.
#[async_trait]
pub trait TrendSource: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, topic: &str, window: LookbackWindow) -> Result<Vec<RawSignal>, SourceError>;
}

/// Google News and Google Trends related queries through SerpAPI.
pub struct SerpApiSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    country: String,
    language: String,
}

impl SerpApiSource {
    pub fn new(config: &SignalsConfig) -> Self {
        let api_key = std::env::var(&config.serpapi_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "[SIGNALS] SerpAPI source created without API key - {} not set",
                config.serpapi_key_env
            );
        }

        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("[SIGNALS] Could not build SerpAPI client ({}), using defaults", err);
                Client::new()
            });

        Self {
            client,
            base_url: config.serpapi_base_url.clone(),
            api_key,
            country: config.country.clone(),
            language: config.language.clone(),
        }
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| SourceError::Rejected("SerpAPI key is not configured".to_string()))?;

        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .query(&[("api_key", api_key.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(SourceError::RateLimited),
            status if status.is_server_error() => {
                return Err(SourceError::Unavailable(format!("HTTP {}", status.as_u16())))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Rejected(format!("HTTP {}: {}", status.as_u16(), body)));
            }
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("unreadable response: {e}")))
    }

    async fn news(&self, topic: &str, window: LookbackWindow, now: DateTime<Utc>) -> Result<Vec<RawSignal>, SourceError> {
        let params = [
            ("engine", "google".to_string()),
            ("tbm", "nws".to_string()),
            ("q", topic.to_string()),
            ("gl", self.country.clone()),
            ("hl", self.language.clone()),
            ("tbs", news_recency(window).to_string()),
            ("num", "40".to_string()),
        ];
        let body = self.get(&params).await?;
        Ok(parse_news_results(&body, now))
    }

    async fn trends(&self, topic: &str, window: LookbackWindow, now: DateTime<Utc>) -> Result<Vec<RawSignal>, SourceError> {
        let params = [
            ("engine", "google_trends".to_string()),
            ("q", topic.to_string()),
            ("geo", self.country.to_uppercase()),
            ("data_type", "RELATED_QUERIES".to_string()),
            ("date", trends_range(window).to_string()),
        ];
        let body = self.get(&params).await?;
        Ok(parse_related_queries(&body, now))
    }
}

#[async_trait]
impl TrendSource for SerpApiSource {
    fn name(&self) -> &str {
        "serpapi"
    }

    async fn query(&self, topic: &str, window: LookbackWindow) -> Result<Vec<RawSignal>, SourceError> {
        let now = window.end;
        let (news, trends) = tokio::join!(self.news(topic, window, now), self.trends(topic, window, now));

        match (news, trends) {
            (Ok(mut news), Ok(trends)) => {
                news.extend(trends);
                Ok(news)
            }
            (Ok(only), Err(err)) | (Err(err), Ok(only)) => {
                tracing::warn!("[SIGNALS] Partial SerpAPI result for '{}': {}", topic, err);
                Ok(only)
            }
            (Err(err), Err(_)) => Err(err),
        }
    }
}

fn news_recency(window: LookbackWindow) -> &'static str {
    match window.hours() {
        h if h <= 1.0 => "qdr:h",
        h if h <= 24.0 => "qdr:d",
        h if h <= 24.0 * 7.0 => "qdr:w",
        _ => "qdr:m",
    }
}

fn trends_range(window: LookbackWindow) -> &'static str {
    match window.hours() {
        h if h <= 4.0 => "now 4-H",
        h if h <= 24.0 => "now 1-d",
        h if h <= 24.0 * 7.0 => "now 7-d",
        _ => "today 1-m",
    }
}

/// News results carry no volume, so prominence (inverse rank) stands in for it.
fn parse_news_results(body: &Value, now: DateTime<Utc>) -> Vec<RawSignal> {
    let Some(items) = body["news_results"].as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let title = item["title"].as_str()?.trim();
            if title.is_empty() {
                return None;
            }
            let position = item["position"].as_u64().unwrap_or(idx as u64 + 1).max(1);
            let outlet = item["source"]
                .as_str()
                .or_else(|| item["source"]["name"].as_str())
                .unwrap_or("news");
            let timestamp = item["iso_date"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| item["date"].as_str().and_then(|d| parse_news_date(d, now)))
                .unwrap_or(now);

            Some(RawSignal {
                source_name: format!("news:{outlet}"),
                text: title.to_string(),
                timestamp,
                volume_metric: 100.0 / position as f64,
            })
        })
        .collect()
}

fn parse_related_queries(body: &Value, now: DateTime<Utc>) -> Vec<RawSignal> {
    let related = &body["related_queries"];
    ["rising", "top"]
        .into_iter()
        .flat_map(|bucket| {
            related[bucket]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(move |item| (bucket, item))
        })
        .filter_map(|(bucket, item)| {
            let query = item["query"].as_str()?.trim().to_string();
            if query.is_empty() {
                return None;
            }
            let volume = item["extracted_value"].as_f64().unwrap_or(0.0).max(0.0);
            Some(RawSignal {
                source_name: format!("trends:{bucket}"),
                text: query,
                timestamp: now,
                volume_metric: volume,
            })
        })
        .collect()
}

/// Parse "3 hours ago" style or absolute SerpAPI news dates.
fn parse_news_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(caps) = RELATIVE_DATE_RE.captures(raw) {
        let amount: i64 = caps[1].parse().ok()?;
        let delta = match caps[2].to_lowercase().as_str() {
            "minute" | "min" => Duration::try_minutes(amount),
            "hour" => Duration::try_hours(amount),
            "day" => Duration::try_days(amount),
            "week" => Duration::try_weeks(amount),
            _ => None,
        }?;
        return now.checked_sub_signed(delta);
    }

    let without_zone = raw.trim_end_matches(" UTC").trim_end_matches(", +0000");
    NaiveDateTime::parse_from_str(without_zone, "%m/%d/%Y, %I:%M %p")
        .ok()
        .map(|naive| naive.and_utc())
}
