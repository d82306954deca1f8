//! Shared discovery types and the post-processing pipeline both reference
//! strategies apply to a raw LLM discovery response: validate the primary
//! selector, fall back through alternatives with confidence decay, then
//! bump confidence for uniqueness/visibility. Grounded on spec.md §4.7.

use crate::browser::BrowserSession;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Default, Clone)]
pub struct DiscoveryContext {
    pub url: Option<String>,
    pub html: Option<String>,
    pub test_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub selector: String,
    pub confidence: f64,
    pub alternatives: Vec<String>,
    pub element_info: Option<Value>,
    pub strategy: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Error, Clone)]
pub enum DiscoveryError {
    #[error("no strategy found an element for \"{description}\" (attempted: {attempted})")]
    NoStrategy { description: String, attempted: String },
}

/// A pluggable element-discovery strategy. `discover` returns `None` on
/// failure rather than an error — individual strategy failures are logged
/// by the caller but never poison the others (spec.md §4.7).
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn is_vision(&self) -> bool {
        false
    }

    async fn discover(
        &self,
        page: &dyn BrowserSession,
        description: &str,
        action_type: &str,
        ctx: &DiscoveryContext,
    ) -> Option<DiscoveryResult>;
}

const SEMANTIC_CONCEPTS: [&str; 24] = [
    "login form",
    "signup form",
    "sign in form",
    "sign up form",
    "registration form",
    "contact form",
    "search form",
    "form",
    "modal",
    "dialog",
    "popup",
    "menu",
    "navigation",
    "header",
    "footer",
    "sidebar",
    "card",
    "panel",
    "section",
    "container",
    "group",
    "region",
    "area",
    "zone",
];

/// `true` if `description` names one of the semantic container concepts
/// spec.md §4.7 lists (case-insensitive substring match).
pub fn is_semantic_concept(description: &str) -> bool {
    let lower = description.to_lowercase();
    SEMANTIC_CONCEPTS.iter().any(|concept| lower.contains(concept))
}

#[derive(Debug, Deserialize)]
struct RawDiscoveryResponse {
    selector: String,
    confidence: f64,
    #[serde(default)]
    alternatives: Vec<String>,
    #[serde(default, rename = "elementInfo")]
    element_info: Option<Value>,
}

/// Parse the LLM's raw `{selector, confidence, alternatives[], elementInfo}`
/// JSON reply, stripping a leading/trailing markdown code fence if present
/// (same defensive idiom the teacher applies to planner replies).
pub fn parse_discovery_response(raw: &str) -> Option<(String, f64, Vec<String>, Option<Value>)> {
    let trimmed = strip_markdown_fence(raw);
    let parsed: RawDiscoveryResponse = serde_json::from_str(trimmed).ok()?;
    Some((parsed.selector, parsed.confidence, parsed.alternatives, parsed.element_info))
}

fn strip_markdown_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Validate `selector`, falling back through `alternatives` in order with
/// confidence decayed by `×0.9` per fallback step, then bump confidence for
/// uniqueness/visibility and clamp to `[0, 1]`.
pub async fn validate_and_adjust(
    page: &dyn BrowserSession,
    strategy: &str,
    selector: String,
    confidence: f64,
    alternatives: Vec<String>,
    element_info: Option<Value>,
) -> Option<DiscoveryResult> {
    let mut candidates = Vec::with_capacity(alternatives.len() + 1);
    candidates.push(selector);
    candidates.extend(alternatives.iter().cloned());

    for (index, candidate) in candidates.iter().enumerate() {
        let validation = page.validate_selector(candidate).await;
        if !validation.exists {
            continue;
        }
        let decay = 0.9f64.powi(index as i32);
        let adjusted = (confidence * decay
            + if validation.is_unique { 0.1 } else { 0.0 }
            + if validation.is_visible { 0.1 } else { 0.0 })
        .clamp(0.0, 1.0);

        let remaining_alternatives: Vec<String> = candidates
            .iter()
            .filter(|c| *c != candidate)
            .cloned()
            .collect();

        return Some(DiscoveryResult {
            selector: candidate.clone(),
            confidence: adjusted,
            alternatives: remaining_alternatives,
            element_info,
            strategy: strategy.to_string(),
            metadata: None,
        });
    }

    None
}
