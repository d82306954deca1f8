//! `Planner.plan`, spec.md §4.8. Grounded on the teacher's `LLMPlanner` in
//! `llm/llm_planner.rs`: low-temperature chat call, markdown-fence-stripped
//! JSON extraction, `serde_json::Value` field pulls with defaults.

use crate::llm::{ChatCompletionRequest, ChatMessage, LLMProvider};
use crate::model::{Action, Assertion, Plan, Step};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, warn};

#[derive(Debug, Error, Clone)]
pub enum PlannerError {
    #[error("planner returned malformed output: {0}")]
    MalformedPlan(String),
    #[error("planner LLM call failed: {0}")]
    LlmFailure(String),
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

const MAX_NAME_LEN: usize = 100;

pub struct Planner {
    llm: Arc<dyn LLMProvider>,
    model: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    #[instrument(skip(self, scenario_text))]
    pub async fn plan(&self, scenario_id: &str, scenario_text: &str) -> Result<Plan, PlannerError> {
        let steps = self.plan_steps(scenario_text).await?;
        let name = self.plan_name(scenario_text).await;
        Ok(Plan::new(scenario_id, name, steps))
    }

    async fn plan_steps(&self, scenario_text: &str) -> Result<Vec<Step>, PlannerError> {
        let messages = vec![
            ChatMessage::system(
                "You decompose a browser-test scenario into an ordered list of atomic steps. \
                 Respond with JSON only: {\"steps\": [{\"id\": string, \"description\": string, \
                 \"action\": {\"name\": string, \"arguments\": object}, \"assertion\": {\"target\": string, \
                 \"operation\": string, \"value\": string} | null}]}.",
            ),
            ChatMessage::user(format!("Scenario: {scenario_text}")),
        ];
        let request = ChatCompletionRequest::new(self.model.clone(), messages).temperature(0.1).json_mode();
        let response = self
            .llm
            .create_chat_completion(request)
            .await
            .map_err(|error| PlannerError::LlmFailure(error.to_string()))?;

        let raw: Value = serde_json::from_str(strip_markdown_fence(&response.content)).map_err(|error| PlannerError::MalformedPlan(error.to_string()))?;

        let steps_value = raw
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| PlannerError::MalformedPlan("missing \"steps\" array".to_string()))?;

        if steps_value.is_empty() {
            return Err(PlannerError::MalformedPlan("\"steps\" array is empty".to_string()));
        }

        steps_value.iter().map(parse_step).collect()
    }

    async fn plan_name(&self, scenario_text: &str) -> String {
        let messages = vec![
            ChatMessage::system("Summarize the scenario as a short plan name, 10 words or fewer. Respond with the name only, no quotes."),
            ChatMessage::user(scenario_text.to_string()),
        ];
        let request = ChatCompletionRequest::new(self.model.clone(), messages).temperature(0.0);

        match self.llm.create_chat_completion(request).await {
            Ok(response) => {
                let name = response.content.trim();
                if name.is_empty() {
                    fallback_name(scenario_text)
                } else {
                    truncate(name, MAX_NAME_LEN)
                }
            }
            Err(error) => {
                warn!(%error, "plan-name LLM call failed, falling back to scenario prefix");
                fallback_name(scenario_text)
            }
        }
    }
}

fn fallback_name(scenario_text: &str) -> String {
    let words: Vec<&str> = scenario_text.split_whitespace().take(8).collect();
    truncate(&words.join(" "), MAX_NAME_LEN)
}

pub(super) fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len).collect()
    }
}

pub(super) fn strip_markdown_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn parse_step(value: &Value) -> Result<Step, PlannerError> {
    let id = value.get("id").and_then(Value::as_str).ok_or_else(|| PlannerError::MalformedPlan("step missing \"id\"".to_string()))?;
    let description = value.get("description").and_then(Value::as_str).unwrap_or_default();
    let action_value = value.get("action").ok_or_else(|| PlannerError::MalformedPlan(format!("step {id} missing \"action\"")))?;
    let name = action_value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| PlannerError::MalformedPlan(format!("step {id} action missing \"name\"")))?;
    let arguments = action_value.get("arguments").and_then(Value::as_object).cloned().unwrap_or_default();

    let mut action = Action::new(name);
    for (key, value) in arguments {
        action = action.with_arg(key, value);
    }

    let mut step = Step::new(id, description, action);

    if let Some(assertion_value) = value.get("assertion").filter(|v| !v.is_null()) {
        step = step.with_assertion(Assertion {
            target: assertion_value.get("target").and_then(Value::as_str).unwrap_or_default().to_string(),
            operation: assertion_value.get("operation").and_then(Value::as_str).unwrap_or_default().to_string(),
            value: assertion_value.get("value").and_then(Value::as_str).map(str::to_string),
        });
    }

    Ok(step)
}
