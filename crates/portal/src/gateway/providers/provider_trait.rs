//! Provider trait definition for reasoning backends

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::text::extract_json_object;

/// Error type for a single provider attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The provider cannot be called at all, e.g. its API key is missing.
    /// Other candidates may still serve the role.
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Timeouts, rate limits, 5xx and network errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Transient(_))
    }
}

/// Prompt sent to a reasoning provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderPrompt {
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON object reply.
    #[serde(default)]
    pub expect_json: bool,
}

impl ProviderPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            expect_json: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// Provider reply: free text plus optional structured fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderReply {
    pub text: String,
    #[serde(default)]
    pub fields: Option<Map<String, Value>>,
}

impl ProviderReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: None,
        }
    }

    pub fn with_fields(text: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            text: text.into(),
            fields: Some(fields),
        }
    }

    /// Structured fields, falling back to a JSON object embedded in the text.
    pub fn structured(&self) -> Option<Map<String, Value>> {
        self.fields
            .clone()
            .or_else(|| extract_json_object(&self.text))
    }
}

/// Trait implemented by every reasoning backend
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Registry name, referenced by role routing.
    fn name(&self) -> &str;

    /// Send one prompt on behalf of `role`.
    async fn send(
        &self,
        role: &str,
        prompt: &ProviderPrompt,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError>;
}
