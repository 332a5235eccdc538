//! Reasoning provider implementations

mod openai;
mod provider_trait;

pub use openai::OpenAiCompatibleProvider;
pub use provider_trait::{ProviderError, ProviderPrompt, ProviderReply, ReasoningProvider};
