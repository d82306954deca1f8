//! Core data model: Scenario, Step, Plan, Execution, and the values that
//! flow between the orchestrator, storage, and the external capabilities.
//!
//! Every type here is `Serialize`/`Deserialize` because it crosses the
//! Storage boundary (and, for Step/Plan, the LLM JSON boundary) at some
//! point in the control loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Derive the deterministic scenario id for a scenario's free text.
///
/// Lowercase + trim, then SHA-256, then the first 16 hex characters,
/// prefixed with `scenario-`. Equal normalized scenarios always produce
/// the same id (spec.md invariant).
pub fn generate_scenario_id(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let hex = hex::encode(digest);
    format!("scenario-{}", &hex[..16])
}

/// One atomic browser action a [`Step`] asks the executor to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// `true` if the action is one of the interactive kinds the refinement
    /// engine and orchestrator treat specially (click/type/hover/verify_element).
    pub fn is_interactive(&self) -> bool {
        matches!(
            self.name.as_str(),
            "click" | "type" | "hover" | "verify_element"
        )
    }
}

/// Target of a `verify_*` action, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationTarget {
    Title,
    Text,
    Body,
    Url,
    Element,
    Heading,
    Heading1,
    Heading2,
    Heading3,
    Heading4,
    Heading5,
    Heading6,
    Link,
    Button,
    Input,
    Label,
}

impl VerificationTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize_token(raw);
        Some(match normalized.as_str() {
            "title" => Self::Title,
            "text" => Self::Text,
            "body" => Self::Body,
            "url" => Self::Url,
            "element" => Self::Element,
            "heading" => Self::Heading,
            "heading1" | "h1" => Self::Heading1,
            "heading2" | "h2" => Self::Heading2,
            "heading3" | "h3" => Self::Heading3,
            "heading4" | "h4" => Self::Heading4,
            "heading5" | "h5" => Self::Heading5,
            "heading6" | "h6" => Self::Heading6,
            "link" => Self::Link,
            "button" => Self::Button,
            "input" => Self::Input,
            "label" => Self::Label,
            _ => return None,
        })
    }
}

/// Operation of a `verify_*` action, per spec.md §3. Each has an implicit
/// `not_` negated form (e.g. `not_contains`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOperation {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Matches,
    Visible,
    Exists,
}

impl VerificationOperation {
    /// Parse `contains`, `not_contains`, `notContains`, `startsWith`, ... into
    /// `(operation, negated)`. Accepts both snake_case and camelCase forms.
    pub fn parse(raw: &str) -> Option<(Self, bool)> {
        let normalized = normalize_token(raw);
        let (negated, rest) = match normalized.strip_prefix("not_") {
            Some(rest) => (true, rest),
            None => (false, normalized.as_str()),
        };
        let op = match rest {
            "contains" => Self::Contains,
            "equals" => Self::Equals,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "matches" => Self::Matches,
            "visible" => Self::Visible,
            "exists" => Self::Exists,
            _ => return None,
        };
        Some((op, negated))
    }
}

/// Normalize a camelCase or snake_case token to a comparison-friendly
/// lowercase snake_case string (`startsWith` / `starts_with` -> `startswith`).
fn normalize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '_' {
            continue;
        }
        out.extend(ch.to_lowercase());
    }
    out
}

/// The assertion attached to a [`Step`], or checked separately via
/// `Verifier::verify_assertions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub target: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Confidence/selector metadata recorded on a step once it has been
/// refined via element discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDiscoveryMeta {
    pub selector: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub strategy: String,
}

/// One atomic intent within a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub description: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<Assertion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_discovery: Option<ElementDiscoveryMeta>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            action,
            assertion: None,
            original_selector: None,
            element_discovery: None,
            retry_count: 0,
        }
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertion = Some(assertion);
        self
    }

    pub fn selector(&self) -> Option<&str> {
        self.action.argument_str("selector")
    }
}

/// Lifecycle phase of a [`Plan`]. Transitions `Initial -> Refined -> Adaptive`
/// (once `Refined`, a plan stays `Refined` or advances to `Adaptive` on
/// recovery; it never regresses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    Initial,
    Refined,
    Adaptive,
}

impl PlanPhase {
    /// Advance towards a more-refined phase; phases never move backwards.
    pub fn advance_to(self, target: PlanPhase) -> PlanPhase {
        use PlanPhase::*;
        match (self, target) {
            (Adaptive, _) => Adaptive,
            (Refined, Initial) => Refined,
            (_, t) => t,
        }
    }
}

/// One append-only entry in a [`Plan`]'s refinement history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementEntry {
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub strategy: String,
}

/// Ordered sequence of [`Step`]s realizing a [`Scenario`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub scenario_id: String,
    pub name: String,
    pub phase: PlanPhase,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub refinement_history: Vec<RefinementEntry>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(scenario_id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: format!("plan-{}", uuid::Uuid::new_v4()),
            scenario_id: scenario_id.into(),
            name: name.into(),
            phase: PlanPhase::Initial,
            steps,
            refinement_history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn record_refinement(&mut self, step_id: Option<String>, reason: impl Into<String>, strategy: impl Into<String>) {
        self.refinement_history.push(RefinementEntry {
            step_id,
            timestamp: Utc::now(),
            reason: reason.into(),
            strategy: strategy.into(),
        });
    }
}

/// Status of an [`Execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status of a single [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Error,
}

impl StepStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Metadata captured in a [`Snapshot`] right after a step executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
}

/// Page state captured immediately after executing a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn now(metadata: SnapshotMetadata) -> Self {
        Self {
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Outcome of verifying a step's observable effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_verified: bool,
    pub evidence: String,
}

/// Per-step outcome recorded in an [`Execution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub step_id: String,
    pub description: String,
    pub status: StepStatus,
    pub snapshot: Snapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

/// Summary block attached to a finished [`Report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Final output of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub scenario_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    pub results: Vec<ExecutionResult>,
    pub summary: ReportSummary,
}

/// Runtime state of one plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub test_id: String,
    pub scenario_id: String,
    pub scenario: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<usize>,
    #[serde(default)]
    pub results: Vec<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_data: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// Generate a unique `testId`: time-ordered prefix plus a random suffix,
    /// so two executions for the same scenario still sort by creation order.
    pub fn generate_test_id() -> String {
        format!(
            "test-{:x}-{}",
            Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple()
        )
    }

    pub fn new_pending(scenario_id: impl Into<String>, scenario: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            test_id: Self::generate_test_id(),
            scenario_id: scenario_id.into(),
            scenario: scenario.into(),
            status: ExecutionStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            plan_id: None,
            current_step: None,
            total_steps: None,
            results: Vec::new(),
            report_data: None,
            error: None,
        }
    }

    /// Progress as a percentage in `[0, 100]`, computed from `currentStep`/`totalSteps`.
    pub fn progress(&self) -> u8 {
        match (self.current_step, self.total_steps) {
            (_, Some(0)) | (_, None) => {
                if self.status == ExecutionStatus::Completed {
                    100
                } else {
                    0
                }
            }
            (Some(current), Some(total)) => {
                let pct = (current as f64 / total as f64) * 100.0;
                pct.clamp(0.0, 100.0) as u8
            }
            (None, Some(_)) => 0,
        }
    }
}

/// A single configuration entry persisted by Storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
