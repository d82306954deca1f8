//! The five reference refinement strategies, spec.md §4.10.

use super::{no_refinement, recently_refined_for_step, Context, RefinementDecision, RefinementStrategy};
use crate::confidence::ConfidenceThresholdService;
use crate::model::{Plan, PlanPhase, Step};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

const MAX_RETRY_COUNT: u32 = 2;
const RECENT_REFINEMENT_WINDOW_SECS: i64 = 5;

/// Phrases that mark a click step as "revealing" a form the page may
/// already expose. Shared with the orchestrator's `unnecessary_reveal` check.
pub const REVEAL_PHRASES: [&str; 4] = ["reveal form", "click to show form", "show the form", "open the form"];

pub fn is_reveal_description(description: &str) -> bool {
    let lower = description.to_lowercase();
    REVEAL_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Fires once per plan, while it's still `initial`, on a `navigate` step
/// that precedes interactive steps.
pub struct NavigationRefinement;

#[async_trait]
impl RefinementStrategy for NavigationRefinement {
    fn name(&self) -> &str {
        "NavigationRefinement"
    }

    async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision {
        let is_navigate = step.action.name == "navigate";
        let already_refined = plan.refinement_history.iter().any(|entry| entry.strategy == self.name());
        let has_subsequent_interaction = plan.steps.iter().skip(ctx.current_step_index + 1).any(|s| s.action.is_interactive());

        if is_navigate && plan.phase == PlanPhase::Initial && !already_refined && has_subsequent_interaction {
            RefinementDecision {
                should_refine: true,
                reason: "navigation step precedes interactive steps in a still-initial plan".to_string(),
                priority: 100,
                confidence: 0.95,
            }
        } else {
            no_refinement()
        }
    }
}

/// Fires when the current step just failed and still has retry budget.
pub struct FailureRefinement;

#[async_trait]
impl RefinementStrategy for FailureRefinement {
    fn name(&self) -> &str {
        "FailureRefinement"
    }

    async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision {
        let failed = ctx.step_result.map(|result| !result.status.is_success()).unwrap_or(false);
        let interactive = step.action.is_interactive();
        let under_retry_limit = step.retry_count < MAX_RETRY_COUNT;
        let recently_refined = recently_refined_for_step(plan, &step.id, RECENT_REFINEMENT_WINDOW_SECS, Utc::now());

        if failed && interactive && under_retry_limit && !recently_refined {
            RefinementDecision {
                should_refine: true,
                reason: format!("step {} failed and is eligible for recovery", step.id),
                priority: 95,
                confidence: 0.9,
            }
        } else {
            no_refinement()
        }
    }
}

/// Fires when the page changed underneath an interactive step that hasn't
/// been refined since.
pub struct PageChangeRefinement;

#[async_trait]
impl RefinementStrategy for PageChangeRefinement {
    fn name(&self) -> &str {
        "PageChangeRefinement"
    }

    async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision {
        let interactive = step.action.is_interactive();
        let recently_refined = recently_refined_for_step(plan, &step.id, RECENT_REFINEMENT_WINDOW_SECS, Utc::now());

        if ctx.page_changed && interactive && !recently_refined {
            RefinementDecision {
                should_refine: true,
                reason: "page changed since the previous step".to_string(),
                priority: 90,
                confidence: 0.85,
            }
        } else {
            no_refinement()
        }
    }
}

/// Fires when a step's discovered confidence is below the configured
/// threshold for its action, or no discovery metadata exists at all.
pub struct ConfidenceRefinement {
    threshold_service: Arc<ConfidenceThresholdService>,
}

impl ConfidenceRefinement {
    pub fn new(threshold_service: Arc<ConfidenceThresholdService>) -> Self {
        Self { threshold_service }
    }
}

#[async_trait]
impl RefinementStrategy for ConfidenceRefinement {
    fn name(&self) -> &str {
        "ConfidenceRefinement"
    }

    async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision {
        if recently_refined_for_step(plan, &step.id, RECENT_REFINEMENT_WINDOW_SECS, Utc::now()) {
            return no_refinement();
        }

        match &step.element_discovery {
            Some(meta) => {
                let threshold = self.threshold_service.get_threshold(&step.action.name).await;
                if meta.confidence < threshold {
                    RefinementDecision {
                        should_refine: true,
                        reason: format!("discovery confidence {:.2} is below the {:.2} threshold", meta.confidence, threshold),
                        priority: 80,
                        confidence: 0.75,
                    }
                } else {
                    no_refinement()
                }
            }
            None if step.selector().is_none() => RefinementDecision {
                should_refine: true,
                reason: "no selector or discovery metadata present".to_string(),
                priority: 80,
                confidence: 0.9,
            },
            None => no_refinement(),
        }
    }
}

/// Fires when a step's selector is absent or fails live validation, or when
/// a "reveal the form" step's target is already present on the page.
pub struct ProactiveRefinement;

#[async_trait]
impl RefinementStrategy for ProactiveRefinement {
    fn name(&self) -> &str {
        "ProactiveRefinement"
    }

    async fn should_refine(&self, step: &Step, plan: &Plan, ctx: &Context<'_>) -> RefinementDecision {
        if recently_refined_for_step(plan, &step.id, RECENT_REFINEMENT_WINDOW_SECS, Utc::now()) {
            return no_refinement();
        }

        let selector_invalid = match step.selector() {
            Some(selector) => !ctx.page.validate_selector(selector).await.exists,
            None => true,
        };
        if selector_invalid {
            return RefinementDecision {
                should_refine: true,
                reason: "selector is absent or fails live validation".to_string(),
                priority: 70,
                confidence: 0.7,
            };
        }

        if is_reveal_description(&step.description) && target_already_present(ctx.page).await {
            return RefinementDecision {
                should_refine: true,
                reason: "step would reveal a form whose fields are already present; unnecessary".to_string(),
                priority: 80,
                confidence: 0.8,
            };
        }

        no_refinement()
    }
}

pub(crate) async fn target_already_present(page: &dyn crate::browser::BrowserSession) -> bool {
    let email = page.validate_selector("input[type=email]").await;
    let password = page.validate_selector("input[type=password]").await;
    (email.exists && email.is_visible) && (password.exists && password.is_visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowserSession;
    use crate::model::{Action, ExecutionResult, Plan, Snapshot, SnapshotMetadata, Step, StepStatus};

    fn context<'a>(page: &'a dyn crate::browser::BrowserSession, step_result: Option<&'a ExecutionResult>, page_changed: bool, current_step_index: usize) -> Context<'a> {
        Context {
            page,
            executed_steps: &[],
            current_step_index,
            total_steps: 3,
            previous_refinements: &[],
            page_url: "https://example.com".to_string(),
            previous_page_url: None,
            page_changed,
            step_result,
        }
    }

    #[tokio::test]
    async fn navigation_refinement_fires_before_interactive_steps() {
        let plan = Plan::new(
            "scenario-1",
            "plan",
            vec![
                Step::new("s1", "navigate", Action::new("navigate")),
                Step::new("s2", "click", Action::new("click").with_arg("selector", "#go")),
            ],
        );
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let strategy = NavigationRefinement;

        let decision = strategy.should_refine(&plan.steps[0], &plan, &context(&page, None, false, 0)).await;
        assert!(decision.should_refine);
    }

    #[tokio::test]
    async fn failure_refinement_fires_on_failed_interactive_step_under_retry_limit() {
        let plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "click", Action::new("click"))]);
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let failed = ExecutionResult {
            step_id: "s1".to_string(),
            description: "click".to_string(),
            status: StepStatus::Failure,
            snapshot: Snapshot::now(SnapshotMetadata::default()),
            error: Some("not found".to_string()),
            verification: None,
        };
        let strategy = FailureRefinement;

        let decision = strategy.should_refine(&plan.steps[0], &plan, &context(&page, Some(&failed), false, 0)).await;
        assert!(decision.should_refine);
        assert_eq!(decision.priority, 95);
    }

    #[tokio::test]
    async fn failure_refinement_does_not_fire_past_retry_limit() {
        let mut plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "click", Action::new("click"))]);
        plan.steps[0].retry_count = 2;
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let failed = ExecutionResult {
            step_id: "s1".to_string(),
            description: "click".to_string(),
            status: StepStatus::Failure,
            snapshot: Snapshot::now(SnapshotMetadata::default()),
            error: None,
            verification: None,
        };
        let strategy = FailureRefinement;

        let decision = strategy.should_refine(&plan.steps[0], &plan, &context(&page, Some(&failed), false, 0)).await;
        assert!(!decision.should_refine);
    }

    #[tokio::test]
    async fn proactive_refinement_fires_on_invalid_selector() {
        let plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "click", Action::new("click").with_arg("selector", "#missing"))]);
        let page = MockBrowserSession::new("https://example.com", "<html/>");
        let strategy = ProactiveRefinement;

        let decision = strategy.should_refine(&plan.steps[0], &plan, &context(&page, None, false, 0)).await;
        assert!(decision.should_refine);
        assert_eq!(decision.priority, 70);
    }

    #[tokio::test]
    async fn proactive_refinement_flags_unnecessary_reveal() {
        let plan = Plan::new("scenario-1", "plan", vec![Step::new("s1", "reveal form", Action::new("click").with_arg("selector", "#reveal"))]);
        let page = MockBrowserSession::new("https://example.com", "<html/>")
            .with_selector("#reveal", 1, true)
            .await
            .with_selector("input[type=email]", 1, true)
            .await
            .with_selector("input[type=password]", 1, true)
            .await;
        let strategy = ProactiveRefinement;

        let decision = strategy.should_refine(&plan.steps[0], &plan, &context(&page, None, false, 0)).await;
        assert!(decision.should_refine);
        assert!(decision.reason.contains("unnecessary"));
    }
}
