//! `LLM_DOM_ANALYSIS`: the DOM-only reference discovery strategy, spec.md
//! §4.7. Grounded on the teacher's `llm::retry::RetryExecutor` (retry
//! wrapping a chat call) composed with `circuit_breaker::CircuitBreaker`.

use super::common::{is_semantic_concept, parse_discovery_response, validate_and_adjust, DiscoveryContext, DiscoveryResult, DiscoveryStrategy};
use crate::browser::BrowserSession;
use crate::dom::{DOMCache, DOMExtractor, ExtractOptions};
use crate::llm::{ChatCompletionRequest, ChatMessage, LLMProvider};
use crate::resilience::{Backoff, CircuitBreaker, RetryPolicy, RetryStrategy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

pub const CIRCUIT_BREAKER_KEY: &str = "llm-dom-discovery";

pub struct LlmDomAnalysisStrategy {
    llm: Arc<dyn LLMProvider>,
    model: String,
    dom_cache: Arc<DOMCache>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl LlmDomAnalysisStrategy {
    pub fn new(llm: Arc<dyn LLMProvider>, model: impl Into<String>, dom_cache: Arc<DOMCache>, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            llm,
            model: model.into(),
            dom_cache,
            circuit_breaker,
        }
    }

    async fn dom_summary(&self, page: &dyn BrowserSession, include_containers: bool) -> String {
        let url = page.current_url().await;
        if let Some(cached) = self.dom_cache.get(&url) {
            return cached;
        }
        let extractor = DOMExtractor::new(page);
        let summary = extractor
            .extract(ExtractOptions {
                include_containers,
                ..Default::default()
            })
            .await;
        self.dom_cache.set(&url, summary.clone());
        summary
    }

    fn build_prompt(&self, description: &str, action_type: &str, dom_summary: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(
                "You locate a single CSS selector for an element on a web page. \
                 Respond with JSON only: {\"selector\": string, \"confidence\": number between 0 and 1, \
                 \"alternatives\": string[], \"elementInfo\": object}.",
            ),
            ChatMessage::user(format!(
                "Action type: {action_type}\nTarget description: {description}\nDOM summary:\n{dom_summary}"
            )),
        ]
    }

    #[instrument(skip(self, page), fields(strategy = "LLM_DOM_ANALYSIS"))]
    pub async fn discover_impl(
        &self,
        page: &dyn BrowserSession,
        description: &str,
        action_type: &str,
        _ctx: &DiscoveryContext,
    ) -> Option<DiscoveryResult> {
        let include_containers = is_semantic_concept(description);
        let dom_summary = self.dom_summary(page, include_containers).await;
        let messages = self.build_prompt(description, action_type, &dom_summary);
        let model = self.model.clone();
        let llm = self.llm.clone();

        let policy = RetryPolicy::new(2, Backoff::Exponential, Duration::from_millis(200), Duration::from_secs(5));

        let response = self
            .circuit_breaker
            .execute(CIRCUIT_BREAKER_KEY, move || {
                let messages = messages.clone();
                let model = model.clone();
                let llm = llm.clone();
                async move {
                    RetryStrategy::execute(
                        || {
                            let request = ChatCompletionRequest::new(model.clone(), messages.clone()).temperature(0.1).json_mode();
                            let llm = llm.clone();
                            async move { llm.create_chat_completion(request).await }
                        },
                        &policy,
                    )
                    .await
                }
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "LLM_DOM_ANALYSIS strategy failed");
                return None;
            }
        };

        let (selector, confidence, alternatives, element_info) = match parse_discovery_response(&response.content) {
            Some(parsed) => parsed,
            None => {
                warn!("LLM_DOM_ANALYSIS returned unparseable response");
                return None;
            }
        };

        validate_and_adjust(page, "LLM_DOM_ANALYSIS", selector, confidence, alternatives, element_info).await
    }
}

#[async_trait]
impl DiscoveryStrategy for LlmDomAnalysisStrategy {
    fn name(&self) -> &str {
        "LLM_DOM_ANALYSIS"
    }

    async fn discover(
        &self,
        page: &dyn BrowserSession,
        description: &str,
        action_type: &str,
        ctx: &DiscoveryContext,
    ) -> Option<DiscoveryResult> {
        self.discover_impl(page, description, action_type, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowserSession;
    use crate::dom::DOMCacheConfig;
    use crate::llm::mock::{json_response, MockChatProvider};
    use crate::resilience::CircuitBreakerConfig;

    #[tokio::test]
    async fn discover_returns_validated_selector_from_llm_json() {
        let page = MockBrowserSession::new("https://example.com", "<html/>")
            .with_selector("#submit", 1, true)
            .await;
        let llm = Arc::new(MockChatProvider::new(vec![Ok(json_response(
            r##"{"selector": "#submit", "confidence": 0.8, "alternatives": []}"##,
        ))]));
        let strategy = LlmDomAnalysisStrategy::new(
            llm,
            "gpt",
            Arc::new(DOMCache::new(DOMCacheConfig::default())),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        );

        let result = strategy
            .discover(&page, "the submit button", "click", &DiscoveryContext::default())
            .await
            .unwrap();

        assert_eq!(result.selector, "#submit");
        assert!(result.confidence > 0.8);
    }

    #[tokio::test]
    async fn discover_falls_back_to_alternative_with_decay() {
        let page = MockBrowserSession::new("https://example.com", "<html/>")
            .with_selector("#missing", 0, false)
            .await
            .with_selector("#fallback", 1, true)
            .await;
        let llm = Arc::new(MockChatProvider::new(vec![Ok(json_response(
            r##"{"selector": "#missing", "confidence": 0.9, "alternatives": ["#fallback"]}"##,
        ))]));
        let strategy = LlmDomAnalysisStrategy::new(
            llm,
            "gpt",
            Arc::new(DOMCache::new(DOMCacheConfig::default())),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        );

        let result = strategy
            .discover(&page, "the fallback button", "click", &DiscoveryContext::default())
            .await
            .unwrap();

        assert_eq!(result.selector, "#fallback");
        assert!(result.confidence < 0.9 + 0.2);
    }

    #[tokio::test]
    async fn malformed_llm_response_yields_none() {
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let llm = Arc::new(MockChatProvider::new(vec![Ok(json_response("not json"))]));
        let strategy = LlmDomAnalysisStrategy::new(
            llm,
            "gpt",
            Arc::new(DOMCache::new(DOMCacheConfig::default())),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        );

        let result = strategy
            .discover(&page, "anything", "click", &DiscoveryContext::default())
            .await;
        assert!(result.is_none());
    }
}
