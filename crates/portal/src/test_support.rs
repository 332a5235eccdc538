//! Shared fixtures for unit tests.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    brief::{CopyType, LookbackWindow},
    compliance::claim_risk_flags,
    config::PortalConfig,
    creative::CreativeAsset,
    gateway::{ProviderError, ProviderGateway, ProviderPrompt, ProviderReply, ReasoningProvider},
    signals::{RawSignal, SourceError, TrendSource},
    store::PersistenceStore,
};

type Script = dyn Fn(&str, &ProviderPrompt) -> Result<ProviderReply, ProviderError> + Send + Sync;

/// Provider whose replies come from a closure over `(role, prompt)`.
pub(crate) struct ScriptedProvider {
    name: String,
    script: Box<Script>,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new<F>(name: &str, script: F) -> Arc<Self>
    where
        F: Fn(&str, &ProviderPrompt) -> Result<ProviderReply, ProviderError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            script: Box::new(script),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn replying(name: &str, text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(name, move |_, _| Ok(ProviderReply::text(text.clone())))
    }

    pub(crate) fn failing(name: &str, error: ProviderError) -> Arc<Self> {
        Self::new(name, move |_, _| Err(error.clone()))
    }

    pub(crate) fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        role: &str,
        prompt: &ProviderPrompt,
        _timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        (self.script)(role, prompt)
    }
}

/// Trend source with a canned reply.
pub(crate) struct StaticSource {
    reply: Result<Vec<RawSignal>, SourceError>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub(crate) fn returning(signals: Vec<RawSignal>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(signals),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing(error: SourceError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn query(&self, _topic: &str, _window: LookbackWindow) -> Result<Vec<RawSignal>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Trend source that never answers.
pub(crate) struct HangingSource {
    calls: AtomicUsize,
}

impl HangingSource {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendSource for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn query(&self, _topic: &str, _window: LookbackWindow) -> Result<Vec<RawSignal>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(Vec::new())
    }
}

/// Defaults with fast timeouts and backoff.
pub(crate) fn test_config() -> PortalConfig {
    let mut config = PortalConfig::default();
    config.gateway.timeout_ms = 500;
    config.gateway.max_retries = 1;
    config.gateway.backoff_min_ms = 1;
    config.gateway.backoff_max_ms = 5;
    config.signals.fetch_retries = 2;
    config.signals.fetch_backoff_ms = 1;
    config.signals.fetch_timeout_ms = 200;
    config.creative.qa_pass = false;
    config
}

pub(crate) async fn memory_store(config: &PortalConfig) -> Arc<PersistenceStore> {
    let db = db::DBService::new_in_memory()
        .await
        .expect("in-memory database");
    Arc::new(PersistenceStore::new(db, &config.cache))
}

/// Gateway over `provider` plus an always-offline `secondary`.
pub(crate) fn gateway_with(config: &Arc<PortalConfig>, provider: Arc<ScriptedProvider>) -> Arc<ProviderGateway> {
    let mut providers: Vec<Arc<dyn ReasoningProvider>> = vec![provider.clone() as Arc<dyn ReasoningProvider>];
    if provider.name() != "secondary" {
        providers.push(ScriptedProvider::failing(
            "secondary",
            ProviderError::Transient("secondary offline".into()),
        ));
    }
    Arc::new(ProviderGateway::new(config.clone(), providers).expect("gateway"))
}

pub(crate) fn raw_signal(source: &str, text: &str, timestamp: DateTime<Utc>, volume: f64) -> RawSignal {
    RawSignal {
        source_name: source.to_string(),
        text: text.to_string(),
        timestamp,
        volume_metric: volume,
    }
}

pub(crate) fn sample_asset(text: &str) -> CreativeAsset {
    let id = Uuid::new_v4();
    CreativeAsset {
        id,
        lineage_id: id,
        parent_id: None,
        revision: 1,
        goal: "Launch a budget airline fare alert".to_string(),
        copy_type: CopyType::Email,
        locale: "en-AU".to_string(),
        variant_text: text.to_string(),
        plan: None,
        risk_flags: claim_risk_flags(text),
        provider: Some("primary".to_string()),
        created_at: Utc::now(),
    }
}
