//! Post-action verification, spec.md §4.9. Grounded on
//! [`crate::planner::generate`]'s LLM-call idiom (system prompt, JSON
//! schema, markdown-fence-stripped extraction) since both are "ask the
//! model to judge a JSON-describable outcome" seams.

use crate::llm::{ChatCompletionRequest, ChatMessage, ImageDetail, LLMProvider};
use crate::model::{Action, Assertion, ExecutionResult, Snapshot, StepStatus, Step, VerificationResult};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

pub struct Verifier {
    llm: Arc<dyn LLMProvider>,
    model: String,
}

impl Verifier {
    pub fn new(llm: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Verify one step's observable effect against its action outcome,
    /// spec.md §4.9's per-action-kind rules.
    pub async fn verify_step(&self, step: &Step, action: &Action, status: StepStatus, snapshot: &Snapshot, screenshot_base64: Option<&str>) -> VerificationResult {
        match action.name.as_str() {
            "navigate" => {
                if status.is_success() {
                    let url = snapshot.metadata.url.clone().unwrap_or_default();
                    VerificationResult {
                        is_verified: true,
                        evidence: format!("Navigation successful: Page loaded at {url}"),
                    }
                } else {
                    VerificationResult {
                        is_verified: false,
                        evidence: "Navigation did not complete successfully".to_string(),
                    }
                }
            }
            "type" => {
                let expected = action.argument_str("value").unwrap_or_default();
                let typed = snapshot.metadata.typed_value.as_deref().unwrap_or_default();
                if typed == expected {
                    VerificationResult {
                        is_verified: true,
                        evidence: format!("Typed value \"{typed}\" matches expected \"{expected}\""),
                    }
                } else {
                    VerificationResult {
                        is_verified: false,
                        evidence: format!("Typed value \"{typed}\" does not match expected \"{expected}\""),
                    }
                }
            }
            name if name.starts_with("verify_") && status.is_success() => VerificationResult {
                is_verified: true,
                evidence: "DOM-level check already passed".to_string(),
            },
            _ => self.verify_via_llm(step, action, status, snapshot, screenshot_base64).await,
        }
    }

    async fn verify_via_llm(&self, step: &Step, action: &Action, status: StepStatus, snapshot: &Snapshot, screenshot_base64: Option<&str>) -> VerificationResult {
        let metadata_json = serde_json::to_string(&snapshot.metadata).unwrap_or_default();
        let prompt = format!(
            "Step description: {}\nAction: {}\nOutcome status: {status:?}\nSnapshot metadata:\n{metadata_json}\n\
             Did this step achieve its intended effect? Respond with JSON only: \
             {{\"isVerified\": boolean, \"evidence\": string}}.",
            step.description, action.name
        );

        let messages = vec![
            ChatMessage::system("You verify whether a browser-test step achieved its intended effect, given its outcome and page metadata."),
            match screenshot_base64 {
                Some(screenshot) => ChatMessage::user_with_image(prompt, format!("data:image/jpeg;base64,{screenshot}"), Some(ImageDetail::Low)),
                None => ChatMessage::user(prompt),
            },
        ];
        let request = ChatCompletionRequest::new(self.model.clone(), messages).temperature(0.0).json_mode();

        match self.llm.create_chat_completion(request).await {
            Ok(response) => parse_verification(&response.content).unwrap_or(VerificationResult {
                is_verified: false,
                evidence: "verifier returned an unparseable response".to_string(),
            }),
            Err(error) => {
                warn!(%error, "verification LLM call failed");
                VerificationResult {
                    is_verified: false,
                    evidence: format!("verification call failed: {error}"),
                }
            }
        }
    }

    /// One verification per assertion, against the final [`ExecutionResult`].
    pub async fn verify_assertions(&self, assertions: &[Assertion], last_result: &ExecutionResult) -> Vec<VerificationResult> {
        let mut results = Vec::with_capacity(assertions.len());
        for assertion in assertions {
            results.push(self.verify_assertion(assertion, last_result).await);
        }
        results
    }

    async fn verify_assertion(&self, assertion: &Assertion, last_result: &ExecutionResult) -> VerificationResult {
        let metadata_json = serde_json::to_string(&last_result.snapshot.metadata).unwrap_or_default();
        let prompt = format!(
            "Assertion target: {}\nAssertion operation: {}\nExpected value: {}\nFinal snapshot metadata:\n{metadata_json}\n\
             Does the final page state satisfy this assertion? Respond with JSON only: \
             {{\"isVerified\": boolean, \"evidence\": string}}.",
            assertion.target,
            assertion.operation,
            assertion.value.as_deref().unwrap_or("")
        );
        let messages = vec![
            ChatMessage::system("You check a single assertion against a browser test's final page state."),
            ChatMessage::user(prompt),
        ];
        let request = ChatCompletionRequest::new(self.model.clone(), messages).temperature(0.0).json_mode();

        match self.llm.create_chat_completion(request).await {
            Ok(response) => parse_verification(&response.content).unwrap_or(VerificationResult {
                is_verified: false,
                evidence: "verifier returned an unparseable response".to_string(),
            }),
            Err(error) => {
                warn!(%error, "assertion verification LLM call failed");
                VerificationResult {
                    is_verified: false,
                    evidence: format!("verification call failed: {error}"),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerification {
    #[serde(rename = "isVerified")]
    is_verified: bool,
    evidence: String,
}

fn parse_verification(raw: &str) -> Option<VerificationResult> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();
    let parsed: RawVerification = serde_json::from_str(trimmed).ok()?;
    Some(VerificationResult {
        is_verified: parsed.is_verified,
        evidence: parsed.evidence,
    })
}
