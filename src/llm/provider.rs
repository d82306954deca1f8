//! The `LLMProvider` capability trait, spec.md §4.6.
//!
//! Grounded on the teacher's `llm::provider::LLMProvider` trait shape
//! (default-implemented capability flags, `ModelInfo`, a name-keyed
//! registry selecting providers by configuration key).

use super::types::{ChatCompletionRequest, ChatCompletionResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::resilience::RetryClassifiable;

#[derive(Debug, Error, Clone)]
pub enum LLMError {
    #[error("provider returned non-JSON content when JSON was required: {0}")]
    NonJsonResponse(String),
    #[error("provider returned an empty completion")]
    EmptyCompletion,
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("missing credentials for provider {0}")]
    MissingCredentials(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider error: {0}")]
    Other(String),
}

impl RetryClassifiable for LLMError {
    fn tagged_retryable(&self) -> Option<bool> {
        match self {
            LLMError::Timeout | LLMError::RateLimited | LLMError::Transient(_) => Some(true),
            LLMError::NonJsonResponse(_)
            | LLMError::EmptyCompletion
            | LLMError::MissingCredentials(_)
            | LLMError::UnknownProvider(_) => Some(false),
            LLMError::Other(_) => None,
        }
    }
}

pub type LLMResult<T> = Result<T, LLMError>;

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub supports_vision: bool,
    pub supports_json_mode: bool,
}

/// Uniform chat-completion interface. Concrete adapters (OpenAI, Anthropic,
/// gateway passthroughs) are out of this crate's scope; this crate ships a
/// `MockChatProvider` for tests (see [`super::mock`]).
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn create_chat_completion(&self, request: ChatCompletionRequest) -> LLMResult<ChatCompletionResponse>;

    fn supports_vision(&self) -> bool {
        false
    }

    fn supports_json_mode(&self) -> bool {
        true
    }

    async fn validate_connection(&self) -> LLMResult<()> {
        Ok(())
    }

    async fn get_available_models(&self) -> LLMResult<Vec<ModelInfo>> {
        Ok(Vec::new())
    }
}

type ProviderFactory = Box<dyn Fn() -> LLMResult<Arc<dyn LLMProvider>> + Send + Sync>;

/// Selects a provider by configuration key (`LLM_PROVIDER`), validating
/// required credentials at construction time. Mirrors the teacher's
/// `LLMRegistry` factory-map pattern.
pub struct LLMProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

impl LLMProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: impl Into<String>, factory: ProviderFactory) {
        self.factories.write().unwrap().insert(key.into(), factory);
    }

    pub fn create(&self, key: &str) -> LLMResult<Arc<dyn LLMProvider>> {
        let factories = self.factories.read().unwrap();
        let factory = factories
            .get(key)
            .ok_or_else(|| LLMError::UnknownProvider(key.to_string()))?;
        factory()
    }
}

impl Default for LLMProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_key_errors() {
        let registry = LLMProviderRegistry::new();
        let result = registry.create("anthropic");
        assert!(matches!(result, Err(LLMError::UnknownProvider(_))));
    }

    #[test]
    fn transient_errors_are_retryable_others_are_not() {
        assert_eq!(LLMError::Timeout.tagged_retryable(), Some(true));
        assert_eq!(LLMError::EmptyCompletion.tagged_retryable(), Some(false));
        assert_eq!(LLMError::Other("mystery".into()).tagged_retryable(), None);
    }
}
