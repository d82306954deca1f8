//! `AdaptivePlanner`, spec.md §4.8: `refinePlan`/`refineNextStep`/`adaptPlan`.
//! All three append to `refinementHistory` and persist via [`Storage`].

use super::generate::{strip_markdown_fence, PlannerError};
use crate::browser::BrowserSession;
use crate::dom::{DOMExtractor, ExtractOptions};
use crate::llm::{ChatCompletionRequest, ChatMessage, LLMProvider};
use crate::model::{ExecutionResult, Plan, PlanPhase, Step};
use crate::storage::{PlanUpdate, Storage};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

pub struct AdaptivePlanner {
    llm: Arc<dyn LLMProvider>,
    model: String,
    storage: Arc<dyn Storage>,
}

impl AdaptivePlanner {
    pub fn new(llm: Arc<dyn LLMProvider>, model: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            llm,
            model: model.into(),
            storage,
        }
    }

    async fn dom_summary(&self, page: &dyn BrowserSession) -> String {
        DOMExtractor::new(page)
            .extract(ExtractOptions {
                include_containers: true,
                ..Default::default()
            })
            .await
    }

    async fn ask_for_amendments(&self, remaining_steps: &[Step], executed_results: &[ExecutionResult], dom_summary: &str) -> Result<(Vec<String>, Vec<(String, Value)>), PlannerError> {
        let steps_json = serde_json::to_string(remaining_steps).unwrap_or_default();
        let results_json = serde_json::to_string(executed_results).unwrap_or_default();
        let messages = vec![
            ChatMessage::system(
                "You refine the remaining steps of a browser-test plan against the live page. You may amend a \
                 step's action arguments (e.g. a better selector) or remove steps that no longer apply. You may \
                 never add new steps. Respond with JSON only: {\"removeStepIds\": string[], \"amendments\": \
                 [{\"stepId\": string, \"action\": {\"name\": string, \"arguments\": object}}]}.",
            ),
            ChatMessage::user(format!(
                "Remaining steps:\n{steps_json}\nExecuted results so far:\n{results_json}\nLive DOM summary:\n{dom_summary}"
            )),
        ];
        let request = ChatCompletionRequest::new(self.model.clone(), messages).temperature(0.1).json_mode();
        let response = self.llm.create_chat_completion(request).await.map_err(|error| PlannerError::LlmFailure(error.to_string()))?;

        let raw: Value = serde_json::from_str(strip_markdown_fence(&response.content)).map_err(|error| PlannerError::MalformedPlan(error.to_string()))?;

        let remove_ids: Vec<String> = raw
            .get("removeStepIds")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let amendments: Vec<(String, Value)> = raw
            .get("amendments")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|entry| {
                        let step_id = entry.get("stepId").and_then(Value::as_str)?;
                        let action = entry.get("action")?.clone();
                        Some((step_id.to_string(), action))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok((remove_ids, amendments))
    }

    /// Given the current live DOM, refine the remaining steps of `plan`:
    /// remove steps that no longer apply, amend others' arguments. Appends
    /// one `refinementHistory` entry and persists the result.
    #[instrument(skip(self, page, plan, executed_results))]
    pub async fn refine_plan(&self, plan: &Plan, page: &dyn BrowserSession, executed_results: &[ExecutionResult]) -> Result<Plan, PlannerError> {
        let executed_ids: std::collections::HashSet<&str> = executed_results.iter().map(|r| r.step_id.as_str()).collect();
        let remaining: Vec<Step> = plan.steps.iter().filter(|s| !executed_ids.contains(s.id.as_str())).cloned().collect();
        if remaining.is_empty() {
            return Ok(plan.clone());
        }

        let dom_summary = self.dom_summary(page).await;
        let (remove_ids, amendments) = self.ask_for_amendments(&remaining, executed_results, &dom_summary).await?;

        let mut updated = plan.clone();
        apply_amendments(&mut updated, &remove_ids, &amendments);
        updated.phase = updated.phase.advance_to(PlanPhase::Refined);
        updated.record_refinement(None, "refinePlan: live DOM refinement", "AdaptivePlanner.refinePlan");

        self.persist(&updated).await?;
        Ok(updated)
    }

    /// Refines only `plan.steps[next_index]` — cheaper than [`Self::refine_plan`].
    /// Returns the updated plan plus the ids of any steps removed (at most
    /// the one at `next_index`).
    #[instrument(skip(self, page, plan, executed_results), fields(test_id))]
    pub async fn refine_next_step(
        &self,
        plan: &Plan,
        page: &dyn BrowserSession,
        executed_results: &[ExecutionResult],
        next_index: usize,
        test_id: &str,
    ) -> Result<(Plan, Vec<String>), PlannerError> {
        let _ = test_id;
        let Some(next_step) = plan.steps.get(next_index).cloned() else {
            return Ok((plan.clone(), Vec::new()));
        };

        let dom_summary = self.dom_summary(page).await;
        let (remove_ids, amendments) = self.ask_for_amendments(std::slice::from_ref(&next_step), executed_results, &dom_summary).await?;

        let mut updated = plan.clone();
        apply_amendments(&mut updated, &remove_ids, &amendments);
        updated.phase = updated.phase.advance_to(PlanPhase::Refined);

        let removed: Vec<String> = remove_ids.into_iter().filter(|id| id == &next_step.id).collect();
        let reason = if removed.is_empty() {
            "refineNextStep: amended next step".to_string()
        } else {
            "refineNextStep: removed next step".to_string()
        };
        updated.record_refinement(Some(next_step.id.clone()), reason, "AdaptivePlanner.refineNextStep");

        self.persist(&updated).await?;
        Ok((updated, removed))
    }

    /// Produce a plan in phase `adaptive` with `updated_step` (already
    /// carrying the rediscovered selector) replacing its counterpart.
    #[instrument(skip(self, plan, updated_step, reason))]
    pub async fn adapt_plan(&self, plan: &Plan, updated_step: Step, reason: impl Into<String>) -> Result<Plan, PlannerError> {
        let mut updated = plan.clone();
        let step_id = updated_step.id.clone();
        if let Some(slot) = updated.steps.iter_mut().find(|s| s.id == step_id) {
            *slot = updated_step;
        }
        updated.phase = PlanPhase::Adaptive;
        updated.record_refinement(Some(step_id), reason, "AdaptivePlanner.adaptPlan");

        self.persist(&updated).await?;
        Ok(updated)
    }

    async fn persist(&self, plan: &Plan) -> Result<(), PlannerError> {
        self.storage
            .update_plan(
                &plan.id,
                PlanUpdate {
                    name: None,
                    phase: Some(plan.phase),
                    steps: Some(plan.steps.clone()),
                    refinement_history: Some(plan.refinement_history.clone()),
                },
            )
            .await?;
        Ok(())
    }
}

fn apply_amendments(plan: &mut Plan, remove_ids: &[String], amendments: &[(String, Value)]) {
    plan.steps.retain(|s| !remove_ids.contains(&s.id));
    for (step_id, action_value) in amendments {
        if let Some(step) = plan.steps.iter_mut().find(|s| &s.id == step_id) {
            if let Some(name) = action_value.get("name").and_then(Value::as_str) {
                let arguments = action_value.get("arguments").and_then(Value::as_object).cloned().unwrap_or_default();
                let mut action = crate::model::Action::new(name);
                for (key, value) in arguments {
                    action = action.with_arg(key, value);
                }
                step.action = action;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowserSession;
    use crate::llm::mock::{json_response, MockChatProvider};
    use crate::model::{Action, Step};
    use crate::storage::memory::InMemoryStorage;

    fn sample_plan() -> Plan {
        Plan::new(
            "scenario-1",
            "do stuff",
            vec![
                Step::new("s1", "navigate", Action::new("navigate").with_arg("url", "https://example.com")),
                Step::new("s2", "click login", Action::new("click").with_arg("selector", "#login")),
            ],
        )
    }

    #[tokio::test]
    async fn refine_plan_removes_steps_named_in_remove_ids() {
        let storage: Arc<dyn Storage> = InMemoryStorage::shared();
        let plan = sample_plan();
        storage.save_plan(plan.clone()).await.unwrap();

        let llm = Arc::new(MockChatProvider::new(vec![Ok(json_response(
            r#"{"removeStepIds": ["s2"], "amendments": []}"#,
        ))]));
        let planner = AdaptivePlanner::new(llm, "gpt", storage);
        let page = MockBrowserSession::new("https://example.com", "<html/>");

        let refined = planner.refine_plan(&plan, &page, &[]).await.unwrap();

        assert_eq!(refined.steps.len(), 1);
        assert_eq!(refined.phase, PlanPhase::Refined);
        assert_eq!(refined.refinement_history.len(), 1);
    }

    #[tokio::test]
    async fn refine_next_step_only_touches_the_named_index() {
        let storage: Arc<dyn Storage> = InMemoryStorage::shared();
        let plan = sample_plan();
        storage.save_plan(plan.clone()).await.unwrap();

        let llm = Arc::new(MockChatProvider::new(vec![Ok(json_response(
            r#"{"removeStepIds": ["s2"], "amendments": []}"#,
        ))]));
        let planner = AdaptivePlanner::new(llm, "gpt", storage);
        let page = MockBrowserSession::new("https://example.com", "<html/>");

        let (refined, removed) = planner.refine_next_step(&plan, &page, &[], 1, "test-1").await.unwrap();

        assert_eq!(removed, vec!["s2".to_string()]);
        assert_eq!(refined.steps.len(), 1);
        assert_eq!(refined.steps[0].id, "s1");
    }

    #[tokio::test]
    async fn adapt_plan_replaces_step_and_moves_to_adaptive_phase() {
        let storage: Arc<dyn Storage> = InMemoryStorage::shared();
        let plan = sample_plan();
        storage.save_plan(plan.clone()).await.unwrap();

        let llm = Arc::new(MockChatProvider::new(vec![]));
        let planner = AdaptivePlanner::new(llm, "gpt", storage);

        let mut new_step = plan.steps[1].clone();
        new_step.action = Action::new("click").with_arg("selector", "#new-login");

        let adapted = planner.adapt_plan(&plan, new_step, "recovered via discovery").await.unwrap();

        assert_eq!(adapted.phase, PlanPhase::Adaptive);
        assert_eq!(adapted.steps[1].action.argument_str("selector"), Some("#new-login"));
    }
}
