//! Storage abstraction for plans, executions, and configuration.
//!
//! One trait ([`Storage`]), two implementations: [`memory::InMemoryStorage`]
//! (in-process map) and [`remote::RemoteKvStorage`] (generic key-value
//! backend). Grounded on the teacher's `persistence::traits::PersistenceStore`
//! / `persistence::memory::InMemoryStore` split.

pub(crate) mod memory;
mod remote;

pub use memory::InMemoryStorage;
pub use remote::{KvBackend, RemoteKvStorage};

use crate::model::{ConfigEntry, Execution, Plan};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a [`Storage`] backend.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("plan not found: {0}")]
    PlanNotFound(String),
    #[error("cannot update immutable field: {0}")]
    ImmutableField(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Fields an [`Execution`] update may touch. `test_id`/`scenario_id`/
/// `created_at` are never part of this struct — they cannot be mutated.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub status: Option<crate::model::ExecutionStatus>,
    pub plan_id: Option<Option<String>>,
    pub current_step: Option<Option<usize>>,
    pub total_steps: Option<Option<usize>>,
    pub results: Option<Vec<crate::model::ExecutionResult>>,
    pub report_data: Option<Option<crate::model::Report>>,
    pub error: Option<Option<String>>,
    pub completed_at: Option<Option<chrono::DateTime<chrono::Utc>>>,
}

/// Fields a [`Plan`] update may touch. `id`/`scenario_id`/`created_at` are
/// rejected if present in an update (spec.md §4.1 invariant).
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub phase: Option<crate::model::PlanPhase>,
    pub steps: Option<Vec<crate::model::Step>>,
    pub refinement_history: Option<Vec<crate::model::RefinementEntry>>,
}

/// Persistence for Plans, Executions, and Configuration.
#[async_trait]
pub trait Storage: Send + Sync {
    fn generate_scenario_id(&self, text: &str) -> String {
        crate::model::generate_scenario_id(text)
    }

    // -- Executions ---------------------------------------------------
    async fn create_execution(&self, scenario: &str) -> StorageResult<String>;
    async fn get_execution(&self, test_id: &str) -> StorageResult<Option<Execution>>;
    async fn get_executions_by_scenario(&self, scenario_id: &str) -> StorageResult<Vec<Execution>>;
    async fn latest_execution_by_scenario(&self, scenario_id: &str) -> StorageResult<Option<Execution>> {
        Ok(self
            .get_executions_by_scenario(scenario_id)
            .await?
            .into_iter()
            .next())
    }
    async fn update_execution(&self, test_id: &str, update: ExecutionUpdate) -> StorageResult<Execution>;
    async fn delete_execution(&self, test_id: &str) -> StorageResult<()>;
    async fn list_executions(&self) -> StorageResult<Vec<Execution>>;
    async fn delete_all_executions(&self) -> StorageResult<()>;

    // -- Plans ----------------------------------------------------------
    async fn save_plan(&self, plan: Plan) -> StorageResult<Plan>;
    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>>;
    async fn list_plans(&self) -> StorageResult<Vec<Plan>>;
    async fn get_plans_by_scenario(&self, scenario_id: &str) -> StorageResult<Vec<Plan>>;
    async fn update_plan(&self, plan_id: &str, update: PlanUpdate) -> StorageResult<Plan>;
    async fn delete_plan(&self, plan_id: &str) -> StorageResult<()>;
    async fn delete_all_plans(&self) -> StorageResult<()>;

    // -- Configuration ----------------------------------------------------
    async fn config_get(&self, key: &str) -> StorageResult<Option<ConfigEntry>>;
    async fn config_set(&self, key: &str, value: Value, description: Option<String>) -> StorageResult<ConfigEntry>;
    async fn config_get_all(&self, prefix: &str) -> StorageResult<Vec<ConfigEntry>>;
    async fn config_delete(&self, key: &str) -> StorageResult<()>;
    async fn config_delete_all(&self, prefix: &str) -> StorageResult<()>;
}
