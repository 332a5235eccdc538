//! Provider gateway: role routing, per-attempt timeout, retry and fallback.
//!
//! Every reasoning call in the portal goes through [`ProviderGateway::invoke`].
//! A role resolves to an ordered list of candidate providers; each candidate is
//! retried with exponential backoff while its failures are transient, then the
//! gateway falls through to the next candidate. Every attempt is logged and
//! broadcast as a [`CallRecord`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ts_rs::TS;

use crate::{config::PortalConfig, PortalError, Result};

pub mod providers;

pub use providers::{
    OpenAiCompatibleProvider, ProviderError, ProviderPrompt, ProviderReply, ReasoningProvider,
};

/// Capability tags callers route by.
pub mod roles {
    pub const COPYWRITER: &str = "copywriter";
    pub const BELIEVER: &str = "believer";
    pub const SKEPTIC: &str = "skeptic";
    pub const MODERATOR: &str = "moderator";
    pub const FUTURIST: &str = "futurist";
    pub const ANALYST: &str = "analyst";

    pub const ALL: [&str; 6] = [COPYWRITER, BELIEVER, SKEPTIC, MODERATOR, FUTURIST, ANALYST];
}

/// Why one candidate was given up on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFailure {
    pub provider: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Timeout,
    Transient(String),
    Permanent(String),
    NotConfigured(String),
}

impl From<&ProviderError> for CallOutcome {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Timeout(_) => CallOutcome::Timeout,
            ProviderError::Transient(msg) => CallOutcome::Transient(msg.clone()),
            ProviderError::Permanent(msg) => CallOutcome::Permanent(msg.clone()),
            ProviderError::NotConfigured(msg) => CallOutcome::NotConfigured(msg.clone()),
        }
    }
}

/// One provider attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub role: String,
    pub provider: String,
    pub attempt: u32,
    pub latency_ms: u64,
    pub outcome: CallOutcome,
    pub at: DateTime<Utc>,
}

/// Per-call overrides of the configured policy.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub reply: ProviderReply,
    /// Provider that produced the reply.
    pub provider: String,
    /// Attempts spent on that provider.
    pub attempts: u32,
}

pub struct ProviderGateway {
    config: Arc<PortalConfig>,
    providers: HashMap<String, Arc<dyn ReasoningProvider>>,
    calls: broadcast::Sender<CallRecord>,
}

impl ProviderGateway {
    /// Build a gateway over `providers`. Every routed candidate must be registered.
    pub fn new(config: Arc<PortalConfig>, providers: Vec<Arc<dyn ReasoningProvider>>) -> Result<Self> {
        let providers: HashMap<String, Arc<dyn ReasoningProvider>> = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();

        for (role, candidates) in &config.gateway.roles {
            if candidates.is_empty() {
                return Err(PortalError::ConfigError(format!(
                    "role '{role}' has no candidate providers"
                )));
            }
            if let Some(missing) = candidates.iter().find(|c| !providers.contains_key(*c)) {
                return Err(PortalError::ConfigError(format!(
                    "role '{role}' routes to unknown provider '{missing}'"
                )));
            }
        }

        let (calls, _) = broadcast::channel(256);
        Ok(Self {
            config,
            providers,
            calls,
        })
    }

    /// Subscribe to the per-attempt call log.
    pub fn subscribe_calls(&self) -> broadcast::Receiver<CallRecord> {
        self.calls.subscribe()
    }

    pub fn candidates(&self, role: &str) -> Result<&[String]> {
        self.config
            .gateway
            .roles
            .get(role)
            .map(Vec::as_slice)
            .ok_or_else(|| PortalError::ConfigError(format!("unknown role '{role}'")))
    }

    /// Send `prompt` on behalf of `role`, falling back across its candidates.
    pub async fn invoke(
        &self,
        role: &str,
        prompt: &ProviderPrompt,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse> {
        let candidates = self.candidates(role)?;
        let timeout = options.timeout.unwrap_or_else(|| self.config.gateway.timeout());
        let max_retries = options.max_retries.unwrap_or(self.config.gateway.max_retries);
        let mut failures = Vec::new();

        for name in candidates {
            let Some(provider) = self.providers.get(name) else {
                return Err(PortalError::ConfigError(format!("unknown provider '{name}'")));
            };

            let counter = AtomicU32::new(0);
            let counter_ref = &counter;
            let this = self;
            let backoff = ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(self.config.gateway.backoff_min_ms))
                .with_max_delay(Duration::from_millis(self.config.gateway.backoff_max_ms))
                .with_max_times(max_retries)
                .with_jitter();

            let outcome = (move || async move {
                let attempt = counter_ref.fetch_add(1, Ordering::SeqCst) + 1;
                this.attempt(role, provider.as_ref(), prompt, timeout, attempt).await
            })
            .retry(backoff)
            .when(ProviderError::is_transient)
            .notify(|err: &ProviderError, dur: Duration| {
                tracing::warn!(
                    "[GATEWAY] {} via {} failed, retrying after {:.2}s: {}",
                    role,
                    name,
                    dur.as_secs_f64(),
                    err
                );
            })
            .await;

            let attempts = counter.load(Ordering::SeqCst);
            match outcome {
                Ok(reply) => {
                    return Ok(GatewayResponse {
                        reply,
                        provider: name.clone(),
                        attempts,
                    });
                }
                Err(ProviderError::Permanent(message)) => {
                    tracing::error!("[GATEWAY] {} via {} failed permanently: {}", role, name, message);
                    return Err(PortalError::ProviderPermanent(format!("{name}: {message}")));
                }
                Err(err @ ProviderError::NotConfigured(_)) => {
                    tracing::warn!("[GATEWAY] {} skipping {}: {}", role, name, err);
                    failures.push(CandidateFailure {
                        provider: name.clone(),
                        attempts,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        "[GATEWAY] {} giving up on {} after {} attempt(s): {}",
                        role,
                        name,
                        attempts,
                        err
                    );
                    failures.push(CandidateFailure {
                        provider: name.clone(),
                        attempts,
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::error!("[GATEWAY] All candidates exhausted for role {}", role);
        Err(PortalError::ProviderExhausted {
            role: role.to_string(),
            failures,
        })
    }

    async fn attempt(
        &self,
        role: &str,
        provider: &dyn ReasoningProvider,
        prompt: &ProviderPrompt,
        timeout: Duration,
        attempt: u32,
    ) -> std::result::Result<ProviderReply, ProviderError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.send(role, prompt, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(err) => CallOutcome::from(err),
        };
        tracing::info!(
            "[GATEWAY] role={} provider={} attempt={} latency_ms={} outcome={:?}",
            role,
            provider.name(),
            attempt,
            latency_ms,
            outcome
        );
        let _ = self.calls.send(CallRecord {
            role: role.to_string(),
            provider: provider.name().to_string(),
            attempt,
            latency_ms,
            outcome,
            at: Utc::now(),
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, ScriptedProvider};

    fn gateway_over(primary: Arc<ScriptedProvider>, secondary: Arc<ScriptedProvider>) -> ProviderGateway {
        let providers: Vec<Arc<dyn ReasoningProvider>> = vec![primary as Arc<dyn ReasoningProvider>, secondary];
        ProviderGateway::new(Arc::new(test_config()), providers).unwrap()
    }

    fn prompt() -> ProviderPrompt {
        ProviderPrompt::new("You write copy.", "Write a headline.")
    }

    fn drain(rx: &mut broadcast::Receiver<CallRecord>) -> Vec<CallRecord> {
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_primary_success_single_attempt() {
        let primary = ScriptedProvider::replying("primary", "Fly for less");
        let secondary = ScriptedProvider::replying("secondary", "unused");
        let gateway = gateway_over(primary.clone(), secondary.clone());
        let mut rx = gateway.subscribe_calls();

        let response = gateway
            .invoke(roles::COPYWRITER, &prompt(), &InvokeOptions::default())
            .await
            .unwrap();

        assert_eq!(response.provider, "primary");
        assert_eq!(response.attempts, 1);
        assert_eq!(response.reply.text, "Fly for less");
        assert_eq!(secondary.calls(), 0);

        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, CallOutcome::Success);
    }

    #[tokio::test]
    async fn test_transient_retries_then_falls_back() {
        let primary = ScriptedProvider::failing("primary", ProviderError::Transient("503".into()));
        let secondary = ScriptedProvider::replying("secondary", "Fallback copy");
        let gateway = gateway_over(primary.clone(), secondary.clone());
        let mut rx = gateway.subscribe_calls();

        let response = gateway
            .invoke(roles::COPYWRITER, &prompt(), &InvokeOptions::default())
            .await
            .unwrap();

        let retries = test_config().gateway.max_retries;
        assert_eq!(response.provider, "secondary");
        assert_eq!(primary.calls(), retries + 1);
        assert_eq!(secondary.calls(), 1);

        let records = drain(&mut rx);
        assert_eq!(records.len(), retries + 2);
        assert!(records[..=retries].iter().all(|r| r.provider == "primary"));
        assert_eq!(records.last().unwrap().outcome, CallOutcome::Success);
    }

    #[tokio::test]
    async fn test_permanent_error_surfaces_without_retry() {
        let primary = ScriptedProvider::failing("primary", ProviderError::Permanent("400 bad request".into()));
        let secondary = ScriptedProvider::replying("secondary", "unused");
        let gateway = gateway_over(primary.clone(), secondary.clone());

        let err = gateway
            .invoke(roles::COPYWRITER, &prompt(), &InvokeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::ProviderPermanent(_)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_lists_candidates_in_order() {
        let primary = ScriptedProvider::failing("primary", ProviderError::Transient("429".into()));
        let secondary = ScriptedProvider::failing("secondary", ProviderError::Transient("502".into()));
        let gateway = gateway_over(primary, secondary);

        let err = gateway
            .invoke(roles::SKEPTIC, &prompt(), &InvokeOptions::default())
            .await
            .unwrap_err();

        match err {
            PortalError::ProviderExhausted { role, failures } => {
                assert_eq!(role, roles::SKEPTIC);
                let order: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(order, vec!["primary", "secondary"]);
                assert!(failures.iter().all(|f| f.attempts >= 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let primary = ScriptedProvider::replying("primary", "too slow")
            .with_delay(Duration::from_millis(300));
        let secondary = ScriptedProvider::replying("secondary", "in time");
        let gateway = gateway_over(primary.clone(), secondary);
        let mut rx = gateway.subscribe_calls();

        let options = InvokeOptions {
            timeout: Some(Duration::from_millis(30)),
            max_retries: Some(0),
        };
        let response = gateway.invoke(roles::COPYWRITER, &prompt(), &options).await.unwrap();

        assert_eq!(response.provider, "secondary");
        let records = drain(&mut rx);
        assert_eq!(records[0].outcome, CallOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_unknown_role_and_unregistered_candidate() {
        let gateway = gateway_over(
            ScriptedProvider::replying("primary", "x"),
            ScriptedProvider::replying("secondary", "y"),
        );
        let err = gateway
            .invoke("astrologer", &prompt(), &InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::ConfigError(_)));

        let only_primary: Vec<Arc<dyn ReasoningProvider>> =
            vec![ScriptedProvider::replying("primary", "x") as Arc<dyn ReasoningProvider>];
        let result = ProviderGateway::new(Arc::new(test_config()), only_primary);
        assert!(matches!(result, Err(PortalError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_keyless_primary_falls_through_to_secondary() {
        let endpoint = crate::config::ProviderEndpointConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            model: "test-model".to_string(),
            api_key_env: None,
            temperature: 0.2,
            max_tokens: 64,
        };
        let secondary = ScriptedProvider::replying("secondary", "Fallback copy");
        let providers: Vec<Arc<dyn ReasoningProvider>> = vec![
            Arc::new(OpenAiCompatibleProvider::new("primary", &endpoint)),
            secondary.clone(),
        ];
        let gateway = ProviderGateway::new(Arc::new(test_config()), providers).unwrap();
        let mut rx = gateway.subscribe_calls();

        let response = gateway
            .invoke(roles::COPYWRITER, &prompt(), &InvokeOptions::default())
            .await
            .unwrap();

        assert_eq!(response.provider, "secondary");
        assert_eq!(secondary.calls(), 1);
        let records = drain(&mut rx);
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].outcome, CallOutcome::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_no_configured_candidate_is_exhaustion() {
        let primary = ScriptedProvider::failing("primary", ProviderError::NotConfigured("no key".into()));
        let secondary = ScriptedProvider::failing("secondary", ProviderError::NotConfigured("no key".into()));
        let gateway = gateway_over(primary.clone(), secondary);

        let err = gateway
            .invoke(roles::MODERATOR, &prompt(), &InvokeOptions::default())
            .await
            .unwrap_err();

        match err {
            PortalError::ProviderExhausted { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.attempts == 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(primary.calls(), 1);
    }
}
