//! `AdaptiveOrchestrator`, spec.md §4.11: the step loop tying every other
//! component together. Grounded in idiom on the resilience module's
//! span-per-attempt instrumentation and on an observe-think-act loop shape,
//! structurally a `loop` over steps with an explicit cleanup step since Rust
//! has no `finally`.

use crate::browser::BrowserSession;
use crate::confidence::ConfidenceThresholdService;
use crate::discovery::{DiscoveryContext, ElementDiscovery};
use crate::model::{ElementDiscoveryMeta, ExecutionResult, Plan, RefinementEntry, Report, ReportSummary, Snapshot, SnapshotMetadata, Step, StepStatus};
use crate::planner::AdaptivePlanner;
use crate::refinement::{is_reveal_description, target_already_present, Context as RefinementContext, RefinementDecisionEngine};
use crate::storage::Storage;
use crate::verifier::Verifier;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, warn, Instrument};

const NETWORKIDLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RECOVERY_RETRIES: u32 = 2;

/// Receives progress updates as the orchestrator advances through a plan.
/// The async execution manager implements this to mirror progress into
/// [`crate::model::Execution`].
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, current_step: usize, total_steps: usize, results: &[ExecutionResult]);
}

/// A [`ProgressSink`] that does nothing, for callers that don't need
/// incremental updates (tests, synchronous one-shot runs).
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn on_progress(&self, _current_step: usize, _total_steps: usize, _results: &[ExecutionResult]) {}
}

pub struct AdaptiveOrchestrator {
    browser: Box<dyn BrowserSession>,
    discovery: Arc<ElementDiscovery>,
    planner: Arc<AdaptivePlanner>,
    verifier: Arc<Verifier>,
    refinement_engine: Arc<RefinementDecisionEngine>,
    threshold_service: Arc<ConfidenceThresholdService>,
    storage: Option<Arc<dyn Storage>>,
    fail_fast: bool,
    cancel_flag: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl AdaptiveOrchestrator {
    pub fn new(
        browser: Box<dyn BrowserSession>,
        discovery: Arc<ElementDiscovery>,
        planner: Arc<AdaptivePlanner>,
        verifier: Arc<Verifier>,
        refinement_engine: Arc<RefinementDecisionEngine>,
        threshold_service: Arc<ConfidenceThresholdService>,
    ) -> Self {
        Self {
            browser,
            discovery,
            planner,
            verifier,
            refinement_engine,
            threshold_service,
            storage: None,
            fail_fast: true,
            cancel_flag: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Installs a flag the caller can flip to request cancellation. Checked
    /// at the top of every step-boundary iteration (spec.md §5).
    pub fn with_cancel_flag(mut self, cancel_flag: Arc<std::sync::atomic::AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    /// Runs `plan` to completion (or to the first unrecoverable failure),
    /// reporting progress through `progress` and always closing the browser
    /// session on the way out.
    pub async fn run(&mut self, mut plan: Plan, test_id: &str, progress: &dyn ProgressSink) -> Report {
        let start_time = Utc::now();
        let total_steps = plan.steps.len();
        let mut removed: HashSet<String> = HashSet::new();
        let mut results: Vec<ExecutionResult> = Vec::new();
        let mut previous_page_url: Option<String> = None;
        let mut failure_reason: Option<String> = None;

        let mut index = 0;
        while index < plan.steps.len() {
            if self.cancel_flag.as_ref().map(|flag| flag.load(std::sync::atomic::Ordering::SeqCst)).unwrap_or(false) {
                failure_reason = Some("cancelled".to_string());
                break;
            }

            let step_id = plan.steps[index].id.clone();
            if removed.contains(&step_id) {
                index += 1;
                continue;
            }

            let mut step = plan.steps[index].clone();
            let span = info_span!("orchestrator_step", step_id = %step.id, index);

            let outcome = async {
                if step.action.name == "click" && is_reveal_description(&step.description) && target_already_present(self.browser.as_ref()).await {
                    plan.refinement_history.push(RefinementEntry {
                        step_id: Some(step.id.clone()),
                        timestamp: Utc::now(),
                        reason: "step would reveal a form whose fields are already present; unnecessary".to_string(),
                        strategy: "ProactiveRefinement".to_string(),
                    });
                    return StepOutcome::Removed;
                }

                let current_url = self.browser.current_url().await;
                let page_changed = previous_page_url.as_deref().map(|prev| prev != current_url).unwrap_or(false);

                let ctx = RefinementContext {
                    page: self.browser.as_ref(),
                    executed_steps: &results,
                    current_step_index: index,
                    total_steps,
                    previous_refinements: &plan.refinement_history,
                    page_url: current_url.clone(),
                    previous_page_url: previous_page_url.clone(),
                    page_changed,
                    step_result: None,
                };
                let decision = self.refinement_engine.should_refine(&step, &plan, &ctx).await;

                if decision.should_refine {
                    if page_changed || step.action.name == "navigate" {
                        self.browser.wait_for_networkidle(NETWORKIDLE_TIMEOUT).await;
                    }
                    match self.planner.refine_plan(&plan, self.browser.as_ref(), &results).await {
                        Ok(refined) => {
                            let before: HashSet<String> = plan.steps.iter().map(|s| s.id.clone()).collect();
                            let after: HashSet<String> = refined.steps.iter().map(|s| s.id.clone()).collect();
                            for missing in before.difference(&after) {
                                removed.insert(missing.clone());
                            }
                            plan = refined;
                            if removed.contains(&step_id) {
                                return StepOutcome::Removed;
                            }
                            match plan.step(&step_id) {
                                Some(refreshed) => step = refreshed.clone(),
                                None => {
                                    removed.insert(step_id.clone());
                                    return StepOutcome::Removed;
                                }
                            }
                        }
                        Err(error) => warn!(%error, "refinePlan failed, proceeding with the unrefined step"),
                    }
                }

                previous_page_url = Some(current_url);

                let mut result = self.execute_step(&step).await;

                if !result.status.is_success() {
                    let ctx2 = RefinementContext {
                        page: self.browser.as_ref(),
                        executed_steps: &results,
                        current_step_index: index,
                        total_steps,
                        previous_refinements: &plan.refinement_history,
                        page_url: self.browser.current_url().await,
                        previous_page_url: previous_page_url.clone(),
                        page_changed: false,
                        step_result: Some(&result),
                    };
                    let decision2 = self.refinement_engine.should_refine(&step, &plan, &ctx2).await;
                    if decision2.should_refine {
                        if let Some(updated_step) = self.attempt_recovery(&step, &result, &mut plan).await {
                            step = updated_step;
                            result = self.execute_step(&step).await;
                        }
                    }
                    if !result.status.is_success() {
                        let reason = format!("step {} ({}) failed: {}", step.id, step.description, result.error.clone().unwrap_or_default());
                        return StepOutcome::Failed(result, reason);
                    }
                }

                let verification = if let Some(assertion) = step.assertion.clone() {
                    self.verifier
                        .verify_assertions(std::slice::from_ref(&assertion), &result)
                        .await
                        .into_iter()
                        .next()
                } else {
                    Some(
                        self.verifier
                            .verify_step(&step, &step.action, result.status, &result.snapshot, result.snapshot.metadata.screenshot_base64.as_deref())
                            .await,
                    )
                };

                if let Some(verification) = verification {
                    let verified = verification.is_verified;
                    result.verification = Some(verification);
                    if !verified {
                        let reason = format!("step {} ({}) failed verification", step.id, step.description);
                        return StepOutcome::Failed(result, reason);
                    }
                }

                StepOutcome::Completed(step, result)
            }
            .instrument(span)
            .await;

            match outcome {
                StepOutcome::Removed => {
                    self.persist_plan(&plan).await;
                    index += 1;
                    continue;
                }
                StepOutcome::Failed(result, reason) => {
                    results.push(result);
                    failure_reason = Some(reason);
                    if self.fail_fast {
                        break;
                    }
                    index += 1;
                }
                StepOutcome::Completed(executed_step, result) => {
                    results.push(result);
                    plan.steps[index] = executed_step;

                    if index + 1 < plan.steps.len() {
                        match self.planner.refine_next_step(&plan, self.browser.as_ref(), &results, index + 1, test_id).await {
                            Ok((refined, removed_ids)) => {
                                plan = refined;
                                removed.extend(removed_ids);
                            }
                            Err(error) => warn!(%error, "refineNextStep failed, continuing with the unrefined plan"),
                        }
                    }

                    progress.on_progress(index + 1, total_steps, &results).await;
                    index += 1;
                }
            }
        }

        if let Err(error) = self.browser.close().await {
            warn!(%error, "browser cleanup failed");
        }

        let end_time = Utc::now();
        Report {
            scenario_id: plan.scenario_id.clone(),
            plan_id: Some(plan.id.clone()),
            results,
            summary: ReportSummary {
                start_time,
                end_time,
                success: failure_reason.is_none(),
                reason: failure_reason,
            },
        }
    }

    async fn execute_step(&self, step: &Step) -> ExecutionResult {
        match self.browser.execute(&step.action).await {
            Ok(outcome) => ExecutionResult {
                step_id: step.id.clone(),
                description: step.description.clone(),
                status: outcome.status,
                snapshot: outcome.snapshot,
                error: outcome.error,
                verification: None,
            },
            Err(error) => ExecutionResult {
                step_id: step.id.clone(),
                description: step.description.clone(),
                status: StepStatus::Error,
                snapshot: Snapshot::now(SnapshotMetadata::default()),
                error: Some(error.to_string()),
                verification: None,
            },
        }
    }

    /// `attemptRecovery`, spec.md §4.11: stop past `retryCount>=2`, discover
    /// a replacement selector, reject below-threshold results, and fold the
    /// rediscovered selector into the plan via `AdaptivePlanner.adaptPlan`.
    async fn attempt_recovery(&self, step: &Step, failure: &ExecutionResult, plan: &mut Plan) -> Option<Step> {
        if step.retry_count >= MAX_RECOVERY_RETRIES {
            return None;
        }

        let description = step
            .action
            .argument_str("description")
            .or_else(|| step.action.argument_str("selector"))
            .unwrap_or(&step.description)
            .to_string();

        let discovered = match self.discovery.discover(self.browser.as_ref(), &description, &step.action.name, &DiscoveryContext::default()).await {
            Ok(result) => result,
            Err(error) => {
                warn!(%error, step_id = %step.id, "element discovery failed during recovery");
                return None;
            }
        };

        // CONFIDENCE_THRESHOLD_HOVER etc. apply uniformly whether the lookup
        // originates from discovery or from recovery, so key by the same
        // action name discovery itself would have used.
        let threshold = self.threshold_service.get_threshold(&step.action.name).await;
        if discovered.confidence < threshold {
            warn!(
                step_id = %step.id,
                confidence = discovered.confidence,
                threshold,
                "discovered selector below confidence threshold, recovery refused"
            );
            let _ = failure;
            return None;
        }

        let mut updated_step = step.clone();
        updated_step.retry_count += 1;
        updated_step.action = updated_step.action.with_arg("selector", discovered.selector.clone());
        updated_step.element_discovery = Some(ElementDiscoveryMeta {
            selector: discovered.selector.clone(),
            confidence: discovered.confidence,
            alternatives: discovered.alternatives.clone(),
            strategy: discovered.strategy.clone(),
        });

        match self.planner.adapt_plan(plan, updated_step.clone(), format!("recovered selector via {}", discovered.strategy)).await {
            Ok(adapted) => {
                *plan = adapted;
                Some(updated_step)
            }
            Err(error) => {
                warn!(%error, step_id = %step.id, "adaptPlan failed during recovery");
                None
            }
        }
    }

    async fn persist_plan(&self, plan: &Plan) {
        if let Some(storage) = &self.storage {
            if let Err(error) = storage
                .update_plan(
                    &plan.id,
                    crate::storage::PlanUpdate {
                        name: None,
                        phase: Some(plan.phase),
                        steps: Some(plan.steps.clone()),
                        refinement_history: Some(plan.refinement_history.clone()),
                    },
                )
                .await
            {
                warn!(%error, "failed to persist plan after step removal");
            }
        }
    }
}

enum StepOutcome {
    Removed,
    Failed(ExecutionResult, String),
    Completed(Step, ExecutionResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowserSession;
    use crate::discovery::LlmDomAnalysisStrategy;
    use crate::dom::{DOMCache, DOMCacheConfig};
    use crate::llm::mock::{json_response, MockChatProvider};
    use crate::model::{Action, Assertion};
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
    use crate::storage::InMemoryStorage;

    async fn build_orchestrator(browser: MockBrowserSession, llm_responses: Vec<crate::llm::LLMResult<crate::llm::ChatCompletionResponse>>) -> (AdaptiveOrchestrator, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> = InMemoryStorage::shared();
        let llm = Arc::new(MockChatProvider::new(llm_responses));
        let dom_cache = Arc::new(DOMCache::new(DOMCacheConfig::default()));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let strategy: Box<dyn crate::discovery::DiscoveryStrategy> = Box::new(LlmDomAnalysisStrategy::new(llm.clone(), "gpt", dom_cache, breaker));
        let discovery = Arc::new(ElementDiscovery::new(vec![strategy]));
        let planner = Arc::new(AdaptivePlanner::new(llm.clone(), "gpt", storage.clone()));
        let verifier = Arc::new(Verifier::new(llm, "gpt"));
        let threshold_service = Arc::new(ConfidenceThresholdService::new(storage.clone()).await);
        let engine = Arc::new(RefinementDecisionEngine::new(vec![]));

        let orchestrator = AdaptiveOrchestrator::new(Box::new(browser), discovery, planner, verifier, engine, threshold_service).with_storage(storage.clone());
        (orchestrator, storage)
    }

    #[tokio::test]
    async fn successful_navigate_and_verify_produces_success_report() {
        let browser = MockBrowserSession::new("https://example.com", "<h1>Example Domain</h1>");
        let (mut orchestrator, storage) = build_orchestrator(browser, vec![]).await;

        let plan = Plan::new(
            "scenario-1",
            "navigate and verify",
            vec![
                Step::new("s1", "navigate to example.com", Action::new("navigate").with_arg("url", "https://example.com")),
                Step::new("s2", "verify heading", Action::new("verify_heading_contains").with_arg("value", "Example Domain"))
                    .with_assertion(Assertion {
                        target: "heading".to_string(),
                        operation: "contains".to_string(),
                        value: Some("Example Domain".to_string()),
                    }),
            ],
        );
        storage.save_plan(plan.clone()).await.unwrap();

        let report = orchestrator.run(plan, "test-1", &NoopProgressSink).await;

        assert!(report.summary.success);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn unnecessary_reveal_step_is_skipped() {
        let browser = MockBrowserSession::new("https://example.com", "<html/>")
            .with_selector("input[type=email]", 1, true)
            .await
            .with_selector("input[type=password]", 1, true)
            .await
            .with_selector("#submit", 1, true)
            .await;
        let (mut orchestrator, storage) = build_orchestrator(browser, vec![]).await;

        let plan = Plan::new(
            "scenario-1",
            "login",
            vec![
                Step::new("s1", "click to reveal form", Action::new("click").with_arg("selector", "#reveal")),
                Step::new("s2", "click submit", Action::new("click").with_arg("selector", "#submit")),
            ],
        );
        storage.save_plan(plan.clone()).await.unwrap();
        let plan_id = plan.id.clone();

        let report = orchestrator.run(plan, "test-1", &NoopProgressSink).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].step_id, "s2");

        let persisted = storage.get_plan(&plan_id).await.unwrap().unwrap();
        assert!(persisted.refinement_history.iter().any(|entry| entry.reason.contains("unnecessary")));
    }

    #[tokio::test]
    async fn failing_step_without_recovery_marks_report_unsuccessful() {
        let browser = MockBrowserSession::new("https://example.com", "<html/>");
        let (mut orchestrator, storage) = build_orchestrator(
            browser,
            vec![Ok(json_response(r##"{"selector": "#still-missing", "confidence": 0.1, "alternatives": []}"##))],
        )
        .await;

        let plan = Plan::new("scenario-1", "click missing", vec![Step::new("s1", "click the button", Action::new("click").with_arg("selector", "#missing"))]);
        storage.save_plan(plan.clone()).await.unwrap();

        let report = orchestrator.run(plan, "test-1", &NoopProgressSink).await;

        assert!(!report.summary.success);
        assert!(report.summary.reason.is_some());
    }
}
