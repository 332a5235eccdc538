//! OpenAI-compatible chat completion provider
//!
//! Works against OpenAI itself and any endpoint speaking the same protocol
//! (Gemini's OpenAI layer, local proxies).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use super::provider_trait::{ProviderError, ProviderPrompt, ProviderReply, ReasoningProvider};
use crate::{config::ProviderEndpointConfig, text::extract_json_object};

pub struct OpenAiCompatibleProvider {
    name: String,
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, config: &ProviderEndpointConfig) -> Self {
        let name = name.into();
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        if api_key.is_some() {
            tracing::info!("[GATEWAY] Provider '{}' initialized ({})", name, config.model);
        } else {
            tracing::warn!(
                "[GATEWAY] Provider '{}' created without API key - {} not set",
                name,
                config.api_key_env.as_deref().unwrap_or("no key variable configured")
            );
        }

        Self {
            name,
            client: Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> ProviderError {
        let message = format!("HTTP {}: {}", status.as_u16(), body.chars().take(300).collect::<String>());
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            ProviderError::Transient(message)
        } else {
            ProviderError::Permanent(message)
        }
    }

    fn classify_transport(err: reqwest::Error, timeout: Duration) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(timeout)
        } else if err.is_builder() {
            ProviderError::Permanent(err.to_string())
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        role: &str,
        prompt: &ProviderPrompt,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured(format!("provider '{}' has no API key", self.name))
        })?;

        let mut payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if prompt.expect_json {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        tracing::debug!("[GATEWAY] {} -> {} ({})", role, self.name, self.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::classify_transport(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("unreadable response body: {e}")))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(ProviderError::Transient("empty completion".to_string()));
        }

        let fields = if prompt.expect_json {
            extract_json_object(&content)
        } else {
            None
        };

        Ok(ProviderReply {
            text: content,
            fields,
        })
    }
}
