//! `RefinementDecisionEngine`, spec.md §4.10: an ordered panel of strategies
//! consulted on every step, the top-ranked `shouldRefine=true` decision wins.

mod strategies;

pub use strategies::{is_reveal_description, ConfidenceRefinement, FailureRefinement, NavigationRefinement, PageChangeRefinement, ProactiveRefinement, REVEAL_PHRASES};
pub(crate) use strategies::target_already_present;

use crate::browser::BrowserSession;
use crate::model::{ExecutionResult, Plan, RefinementEntry, Step};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Everything a strategy needs to judge one step, per spec.md §4.10.
pub struct Context<'a> {
    pub page: &'a dyn BrowserSession,
    pub executed_steps: &'a [ExecutionResult],
    pub current_step_index: usize,
    pub total_steps: usize,
    pub previous_refinements: &'a [RefinementEntry],
    pub page_url: String,
    pub previous_page_url: Option<String>,
    pub page_changed: bool,
    pub step_result: Option<&'a ExecutionResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementDecision {
    pub should_refine: bool,
    pub reason: String,
    pub priority: u32,
    pub confidence: f64,
}

pub(crate) fn no_refinement() -> RefinementDecision {
    RefinementDecision {
        should_refine: false,
        reason: "no refinement needed".to_string(),
        priority: 0,
        confidence: 0.0,
    }
}

pub(crate) fn recently_refined_for_step(plan: &Plan, step_id: &str, window_secs: i64, now: DateTime<Utc>) -> bool {
    plan.refinement_history
        .iter()
        .any(|entry| entry.step_id.as_deref() == Some(step_id) && (now - entry.timestamp).num_seconds().abs() < window_secs)
}

#[async_trait]
pub trait RefinementStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision;
}

/// Runs every strategy, keeps the ones that fire, and ranks them by
/// descending confidence with priority as the tiebreaker.
pub struct RefinementDecisionEngine {
    strategies: Vec<Box<dyn RefinementStrategy>>,
}

impl RefinementDecisionEngine {
    pub fn new(strategies: Vec<Box<dyn RefinementStrategy>>) -> Self {
        Self { strategies }
    }

    pub async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision {
        let mut fired = Vec::new();
        for strategy in &self.strategies {
            let decision = strategy.should_refine(step, plan, ctx).await;
            if decision.should_refine {
                fired.push(decision);
            }
        }
        fired.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.priority.cmp(&a.priority))
        });
        fired.into_iter().next().unwrap_or_else(no_refinement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowserSession;
    use crate::model::{Action, Plan, Step};

    struct AlwaysFires {
        priority: u32,
        confidence: f64,
    }

    #[async_trait]
    impl RefinementStrategy for AlwaysFires {
        fn name(&self) -> &str {
            "AlwaysFires"
        }

        async fn should_refine(&self, _step: &Step, _plan: &Plan, _ctx: &Context<'_>) -> RefinementDecision {
            RefinementDecision {
                should_refine: true,
                reason: "always".to_string(),
                priority: self.priority,
                confidence: self.confidence,
            }
        }
    }

    fn context(page: &dyn BrowserSession) -> Context<'_> {
        Context {
            page,
            executed_steps: &[],
            current_step_index: 0,
            total_steps: 1,
            previous_refinements: &[],
            page_url: "https://example.com".to_string(),
            previous_page_url: None,
            page_changed: false,
            step_result: None,
        }
    }

    #[tokio::test]
    async fn higher_confidence_wins_regardless_of_priority() {
        let engine = RefinementDecisionEngine::new(vec![
            Box::new(AlwaysFires { priority: 100, confidence: 0.5 }),
            Box::new(AlwaysFires { priority: 10, confidence: 0.9 }),
        ]);
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "d", Action::new("click"))]);

        let decision = engine.should_refine(&plan.steps[0], &plan, &context(&page)).await;
        assert_eq!(decision.confidence, 0.9);
    }

    #[tokio::test]
    async fn ties_break_by_priority() {
        let engine = RefinementDecisionEngine::new(vec![
            Box::new(AlwaysFires { priority: 50, confidence: 0.7 }),
            Box::new(AlwaysFires { priority: 90, confidence: 0.7 }),
        ]);
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "d", Action::new("click"))]);

        let decision = engine.should_refine(&plan.steps[0], &plan, &context(&page)).await;
        assert_eq!(decision.priority, 90);
    }

    #[tokio::test]
    async fn no_strategies_means_no_refinement() {
        let engine = RefinementDecisionEngine::new(vec![]);
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "d", Action::new("click"))]);

        let decision = engine.should_refine(&plan.steps[0], &plan, &context(&page)).await;
        assert!(!decision.should_refine);
    }
}
