#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::DBService;
use portal::{
    brief::LookbackWindow,
    gateway::{roles, ProviderError, ProviderPrompt, ProviderReply, ReasoningProvider},
    signals::{RawSignal, SourceError, TrendSource},
    CampaignWizard, PersistenceStore, PortalConfig, ProviderGateway,
};

pub const GOAL: &str = "launch a budget airline fare alert";

type Reply = Result<ProviderReply, ProviderError>;

/// A provider that answers every role with canned focus-group material.
pub struct FocusGroupProvider {
    name: String,
    recommendation: String,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    on_call: Box<dyn Fn(&str) + Send + Sync>,
}

impl FocusGroupProvider {
    pub fn new(name: &str, recommendation: &str) -> Self {
        Self {
            name: name.to_string(),
            recommendation: recommendation.to_string(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            on_call: Box::new(|_| {}),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `hook` with the role of every call, before replying.
    pub fn on_call(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_call = Box::new(hook);
        self
    }

    pub fn calls_for(&self, role: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|r| r.as_str() == role).count())
            .unwrap_or(0)
    }

    fn reply(&self, role: &str, prompt: &ProviderPrompt) -> Reply {
        let body = match role {
            roles::COPYWRITER if prompt.user.contains("focus group reviewed") => {
                r#"{"copy": "Fare alerts for 40 airlines. Fares to Bali from $199 last week."}"#.to_string()
            }
            roles::COPYWRITER => {
                r#"{"plan": "Savings-led", "copy": "Subject: Never miss a fare drop\nSet an alert, fly for less."}"#
                    .to_string()
            }
            roles::FUTURIST => r#"{"name": "Price-watching travellers"}"#.to_string(),
            roles::BELIEVER => r#"{"reply": "I'd set an alert for Bali tonight.", "agrees": false}"#.to_string(),
            roles::SKEPTIC => r#"{"reply": "Show me which routes and a real price.", "agrees": false}"#.to_string(),
            roles::MODERATOR => format!(
                r#"{{"recommendation": "{}", "rationale": "Clear hook, thin proof", "confidence": 0.66,
                    "key_objections": ["No example fare"], "actionable_fixes": ["Quote a recent fare"]}}"#,
                self.recommendation
            ),
            other => return Err(ProviderError::Permanent(format!("unexpected role {other}"))),
        };
        Ok(ProviderReply::text(body))
    }
}

#[async_trait]
impl ReasoningProvider for FocusGroupProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, role: &str, prompt: &ProviderPrompt, _timeout: Duration) -> Reply {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(role.to_string());
        }
        (self.on_call)(role);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply(role, prompt)
    }
}

/// Provider that is always down.
pub struct OfflineProvider(pub &'static str);

#[async_trait]
impl ReasoningProvider for OfflineProvider {
    fn name(&self) -> &str {
        self.0
    }

    async fn send(&self, _role: &str, _prompt: &ProviderPrompt, _timeout: Duration) -> Reply {
        Err(ProviderError::Transient("503 service unavailable".into()))
    }
}

pub struct FixedSource {
    signals: Vec<RawSignal>,
    calls: AtomicUsize,
}

impl FixedSource {
    pub fn new(signals: Vec<RawSignal>) -> Arc<Self> {
        Arc::new(Self {
            signals,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn query(&self, _topic: &str, _window: LookbackWindow) -> Result<Vec<RawSignal>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.signals.clone())
    }
}

fn signal(source: &str, text: &str, at: DateTime<Utc>, volume: f64) -> RawSignal {
    RawSignal {
        source_name: source.to_string(),
        text: text.to_string(),
        timestamp: at,
        volume_metric: volume,
    }
}

/// Five observations, two of which differ only in punctuation and case.
pub fn fare_alert_signals(now: DateTime<Utc>) -> Vec<RawSignal> {
    let hours = chrono::Duration::hours;
    vec![
        signal("google_news", "Qantas slashes domestic fares", now - hours(2), 90.0),
        signal("google_trends", "qantas slashes domestic fares!", now - hours(5), 40.0),
        signal("google_news", "Bali flight deals", now - hours(1), 70.0),
        signal("google_trends", "Jetstar sale to Tokyo", now - hours(10), 55.0),
        signal("google_news", "Fare alert apps compared", now - hours(20), 30.0),
    ]
}

pub fn config() -> Arc<PortalConfig> {
    let mut config = PortalConfig::default();
    config.gateway.timeout_ms = 2_000;
    config.gateway.max_retries = 1;
    config.gateway.backoff_min_ms = 1;
    config.gateway.backoff_max_ms = 5;
    config.signals.fetch_retries = 1;
    config.signals.fetch_backoff_ms = 1;
    config.signals.fetch_timeout_ms = 500;
    config.creative.qa_pass = false;
    Arc::new(config)
}

pub async fn wizard(
    config: Arc<PortalConfig>,
    provider: Arc<FocusGroupProvider>,
    source: Arc<FixedSource>,
) -> Arc<CampaignWizard> {
    let providers: Vec<Arc<dyn ReasoningProvider>> = vec![provider as Arc<dyn ReasoningProvider>, Arc::new(OfflineProvider("secondary"))];
    let gateway = Arc::new(ProviderGateway::new(config.clone(), providers).expect("gateway"));
    let db = DBService::new_in_memory().await.expect("in-memory database");
    let store = Arc::new(PersistenceStore::new(db, &config.cache));
    Arc::new(CampaignWizard::new(config, gateway, source, store))
}
