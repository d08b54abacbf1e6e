//! Provider adapters
//!
//! One adapter per LLM vendor, normalizing three structurally different
//! chat/tool-call wire protocols into the [`Provider`] interface. Adapters
//! translate the abstract message list and tool catalog losslessly into
//! each vendor's shape, extract proposed tool calls back into normalized
//! [`ToolCall`]s, and validate their own credential format before first
//! use. The orchestrator depends only on the trait, never on a concrete
//! vendor type.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::conversation::{Message, ToolCall};
use crate::registry::ToolDefinition;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Failure from a provider adapter
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: invalid API key: {reason}")]
    InvalidKey {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider}: request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: API error {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider}: malformed response: {reason}")]
    MalformedResponse {
        provider: &'static str,
        reason: String,
    },
}

/// Generation options for a provider round-trip
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// Token usage reported by the vendor
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Normalized provider response
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Text content; empty when the model only proposed tool calls
    pub content: String,
    /// Proposed tool calls in the order the vendor returned them
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub model: String,
}

/// An LLM vendor adapter
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in the registry and config
    fn name(&self) -> &'static str;

    /// Check the credential format without a network round-trip
    fn validate_key(&self) -> Result<(), ProviderError>;

    /// One chat round-trip with optional tool availability
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Registry of configured providers, in fallback order
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config: one adapter per configured key, preferred
    /// provider first
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        if let Some(key) = &config.openai_api_key {
            registry.register(Arc::new(OpenAiProvider::new(key.clone())));
        }
        if let Some(key) = &config.anthropic_api_key {
            registry.register(Arc::new(AnthropicProvider::new(key.clone())));
        }
        if let Some(key) = &config.gemini_api_key {
            registry.register(Arc::new(GeminiProvider::new(key.clone())));
        }

        registry.prefer(&config.default_provider);
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    /// Move the named provider to the front of the fallback order
    pub fn prefer(&mut self, name: &str) {
        if let Some(index) = self.providers.iter().position(|p| p.name() == name) {
            let preferred = self.providers.remove(index);
            self.providers.insert(0, preferred);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Providers in fallback order
    pub fn ordered(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyProvider(&'static str);

    #[async_trait]
    impl Provider for DummyProvider {
        fn name(&self) -> &'static str {
            self.0
        }

        fn validate_key(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                usage: TokenUsage::default(),
                model: self.0.to_string(),
            })
        }
    }

    #[test]
    fn test_prefer_reorders() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(DummyProvider("openai")));
        registry.register(Arc::new(DummyProvider("anthropic")));
        registry.register(Arc::new(DummyProvider("gemini")));

        registry.prefer("gemini");
        assert_eq!(registry.names(), vec!["gemini", "openai", "anthropic"]);

        // Unknown name leaves order untouched
        registry.prefer("mistral");
        assert_eq!(registry.names(), vec!["gemini", "openai", "anthropic"]);
    }

    #[test]
    fn test_get_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(DummyProvider("openai")));

        assert!(registry.get("openai").is_some());
        assert!(registry.get("anthropic").is_none());
    }
}
