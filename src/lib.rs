//! Adaptive browser-test orchestrator: turn a free-text scenario into a
//! plan, execute it step by step against a live page, re-plan against the
//! live DOM as the page changes, recover from selector drift via element
//! discovery, and verify each step's observable effect.
//!
//! Grounded on `mofa-foundation` (see `DESIGN.md`), which solves the same
//! shapes — retryable LLM provider, circuit breaker, pluggable persistence,
//! planning/reflection loop — for a different domain (LLM-agent
//! orchestration); this crate keeps its idiom and dependency stack and
//! re-points the semantics at browser-test orchestration.
#![allow(dead_code)]

pub mod async_exec;
pub mod browser;
pub mod confidence;
pub mod config;
pub mod discovery;
pub mod dom;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod prompt;
pub mod refinement;
pub mod resilience;
pub mod storage;
pub mod verifier;

pub use async_exec::ExecutionManager;
pub use browser::{ActionOutcome, BrowserSession, ExecutorError, SelectorValidation};
pub use confidence::ConfidenceThresholdService;
pub use config::Config;
pub use discovery::{
    DiscoveryContext, DiscoveryError, DiscoveryResult, DiscoveryStrategy, ElementDiscovery,
    LlmDomAnalysisStrategy, VisionAiStrategy,
};
pub use dom::{BestSelectorResult, CacheStats, DOMCache, DOMCacheConfig, DOMExtractor, ElementRecord, ExtractOptions};
pub use resilience::{Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RetryClassifiable, RetryPolicy, RetryStrategy};
pub use model::{
    generate_scenario_id, Action, Assertion, ConfigEntry, ElementDiscoveryMeta, Execution,
    ExecutionResult, ExecutionStatus, Plan, PlanPhase, RefinementEntry, Report, ReportSummary,
    Snapshot, SnapshotMetadata, Step, StepStatus, VerificationOperation, VerificationResult,
    VerificationTarget,
};
pub use orchestrator::{AdaptiveOrchestrator, NoopProgressSink, ProgressSink};
pub use planner::{AdaptivePlanner, Planner, PlannerError};
pub use prompt::{PromptError, PromptTemplates};
pub use refinement::{RefinementDecision, RefinementDecisionEngine, RefinementStrategy};
pub use storage::{ExecutionUpdate, PlanUpdate, Storage, StorageError, StorageResult};
pub use verifier::Verifier;
