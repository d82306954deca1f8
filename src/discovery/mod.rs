//! Element discovery, spec.md §4.7: a registry of [`DiscoveryStrategy`]
//! implementations consulted either vision-first (for semantic concepts) or
//! in parallel, with the best confidence-ranked result winning.

mod common;
mod llm_dom;
mod vision;

pub use common::{DiscoveryContext, DiscoveryError, DiscoveryResult, DiscoveryStrategy};
pub use llm_dom::LlmDomAnalysisStrategy;
pub use vision::VisionAiStrategy;

use crate::browser::BrowserSession;
use futures::future::join_all;

/// Runs every registered strategy and returns the best-confidence selector,
/// per spec.md §4.7's ordering: a vision strategy runs alone first for
/// semantic concepts; otherwise every strategy runs concurrently and the
/// highest-confidence non-`None` result wins.
pub struct ElementDiscovery {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl ElementDiscovery {
    pub fn new(strategies: Vec<Box<dyn DiscoveryStrategy>>) -> Self {
        Self { strategies }
    }

    pub async fn discover(&self, page: &dyn BrowserSession, description: &str, action_type: &str, ctx: &DiscoveryContext) -> Result<DiscoveryResult, DiscoveryError> {
        if common::is_semantic_concept(description) {
            if let Some(vision) = self.strategies.iter().find(|s| s.is_vision()) {
                if let Some(result) = vision.discover(page, description, action_type, ctx).await {
                    return Ok(result);
                }
            }
        }

        let attempts = join_all(
            self.strategies
                .iter()
                .map(|strategy| async move { (strategy.name().to_string(), strategy.discover(page, description, action_type, ctx).await) }),
        )
        .await;

        let mut results: Vec<DiscoveryResult> = attempts.into_iter().filter_map(|(_, result)| result).collect();
        results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        if results.is_empty() {
            return Err(DiscoveryError::NoStrategy {
                description: description.to_string(),
                attempted: self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>().join(", "),
            });
        }

        let best = results.remove(0);
        // alternatives is the union of every strategy's selector and
        // alternatives, deduped, minus the winning primary.
        let mut alternatives = Vec::new();
        for result in &results {
            push_unique(&mut alternatives, &result.selector);
            for alt in &result.alternatives {
                push_unique(&mut alternatives, alt);
            }
        }
        for alt in &best.alternatives {
            push_unique(&mut alternatives, alt);
        }
        alternatives.retain(|s| s != &best.selector);

        Ok(DiscoveryResult { alternatives, ..best })
    }

    /// Re-runs discovery for a failed selector, returning `[primary,
    /// ...alternatives]` with the failed selector excluded.
    pub async fn find_alternatives(&self, page: &dyn BrowserSession, failed_selector: &str, description: &str) -> Vec<String> {
        match self.discover(page, description, "click", &DiscoveryContext::default()).await {
            Ok(result) => {
                let mut candidates = vec![result.selector];
                candidates.extend(result.alternatives);
                candidates.retain(|s| s != failed_selector);
                candidates
            }
            Err(_) => Vec::new(),
        }
    }
}

fn push_unique(into: &mut Vec<String>, value: &str) {
    if !into.iter().any(|existing| existing == value) {
        into.push(value.to_string());
    }
}
