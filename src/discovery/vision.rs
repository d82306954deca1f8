//! `VISION_AI`: the hybrid reference discovery strategy, spec.md §4.7. For
//! semantic concepts it pairs a screenshot with a DOM summary and asks a
//! vision-capable model for a CSS selector, never pixel coordinates. For
//! anything else it falls back to the same DOM-only analysis
//! [`super::llm_dom::LlmDomAnalysisStrategy`] performs, reusing its
//! circuit-breaker/retry-wrapped call so the two strategies never duplicate
//! that plumbing.

use super::common::{is_semantic_concept, parse_discovery_response, validate_and_adjust, DiscoveryContext, DiscoveryResult, DiscoveryStrategy};
use super::llm_dom::LlmDomAnalysisStrategy;
use crate::browser::BrowserSession;
use crate::dom::{DOMCache, DOMExtractor, ExtractOptions};
use crate::llm::{ChatCompletionRequest, ChatMessage, ImageDetail, LLMProvider};
use crate::resilience::{Backoff, CircuitBreaker, RetryPolicy, RetryStrategy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

pub const CIRCUIT_BREAKER_KEY: &str = "vision-ai-discovery";
const SCREENSHOT_QUALITY: u8 = 80;

pub struct VisionAiStrategy {
    llm: Arc<dyn LLMProvider>,
    model: String,
    dom_cache: Arc<DOMCache>,
    circuit_breaker: Arc<CircuitBreaker>,
    dom_only_fallback: LlmDomAnalysisStrategy,
}

impl VisionAiStrategy {
    pub fn new(llm: Arc<dyn LLMProvider>, model: impl Into<String>, dom_cache: Arc<DOMCache>, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        let model = model.into();
        let dom_only_fallback = LlmDomAnalysisStrategy::new(llm.clone(), model.clone(), dom_cache.clone(), circuit_breaker.clone());
        Self {
            llm,
            model,
            dom_cache,
            circuit_breaker,
            dom_only_fallback,
        }
    }

    fn build_prompt(&self, description: &str, action_type: &str, dom_summary: &str, screenshot_data_url: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(
                "You locate a single CSS selector for an element shown in a screenshot, using the \
                 accompanying DOM summary to name it precisely. Never answer with pixel coordinates. \
                 Respond with JSON only: {\"selector\": string, \"confidence\": number between 0 and 1, \
                 \"alternatives\": string[], \"elementInfo\": object}.",
            ),
            ChatMessage::user_with_image(
                format!("Action type: {action_type}\nTarget description: {description}\nDOM summary:\n{dom_summary}"),
                screenshot_data_url,
                Some(ImageDetail::High),
            ),
        ]
    }

    #[instrument(skip(self, page), fields(strategy = "VISION_AI"))]
    async fn discover_via_vision(&self, page: &dyn BrowserSession, description: &str, action_type: &str) -> Option<DiscoveryResult> {
        let Some(screenshot) = page.screenshot_base64(SCREENSHOT_QUALITY).await else {
            warn!("VISION_AI could not capture a screenshot, falling back to DOM-only analysis");
            return self.dom_only_fallback.discover_impl(page, description, action_type, &DiscoveryContext::default()).await;
        };
        let screenshot_data_url = format!("data:image/jpeg;base64,{screenshot}");

        let url = page.current_url().await;
        let dom_summary = match self.dom_cache.get(&url) {
            Some(cached) => cached,
            None => {
                let summary = DOMExtractor::new(page)
                    .extract(ExtractOptions {
                        include_containers: true,
                        ..Default::default()
                    })
                    .await;
                self.dom_cache.set(&url, summary.clone());
                summary
            }
        };

        let messages = self.build_prompt(description, action_type, &dom_summary, &screenshot_data_url);
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
                warn!(%error, "VISION_AI strategy failed");
                return None;
            }
        };

        let (selector, confidence, alternatives, element_info) = match parse_discovery_response(&response.content) {
            Some(parsed) => parsed,
            None => {
                warn!("VISION_AI returned unparseable response");
                return None;
            }
        };

        validate_and_adjust(page, "VISION_AI", selector, confidence, alternatives, element_info).await
    }
}

#[async_trait]
impl DiscoveryStrategy for VisionAiStrategy {
    fn name(&self) -> &str {
        "VISION_AI"
    }

    fn is_vision(&self) -> bool {
        true
    }

    async fn discover(
        &self,
        page: &dyn BrowserSession,
        description: &str,
        action_type: &str,
        ctx: &DiscoveryContext,
    ) -> Option<DiscoveryResult> {
        if !self.llm.supports_vision() || !is_semantic_concept(description) {
            return self.dom_only_fallback.discover_impl(page, description, action_type, ctx).await;
        }
        self.discover_via_vision(page, description, action_type).await
    }
}
