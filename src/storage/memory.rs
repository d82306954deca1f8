//! In-process storage backend.
//!
//! Thread-safe, all data held in memory. Suitable for unit tests, local
//! development, and single-instance deployments. Grounded on the teacher's
//! `persistence::memory::InMemoryStore` (primary map + secondary index map
//! per entity, kept in sync on every mutation).

use super::{ExecutionUpdate, PlanUpdate, Storage, StorageError, StorageResult};
use crate::model::{ConfigEntry, Execution, Plan};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory storage. Cheap to construct, safe to share via `Arc`.
pub struct InMemoryStorage {
    executions: RwLock<HashMap<String, Execution>>,
    scenario_executions: RwLock<HashMap<String, Vec<String>>>,
    plans: RwLock<HashMap<String, Plan>>,
    scenario_plans: RwLock<HashMap<String, Vec<String>>>,
    config: RwLock<HashMap<String, ConfigEntry>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            scenario_executions: RwLock::new(HashMap::new()),
            plans: RwLock::new(HashMap::new()),
            scenario_plans: RwLock::new(HashMap::new()),
            config: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_execution(&self, scenario: &str) -> StorageResult<String> {
        let scenario_id = crate::model::generate_scenario_id(scenario);
        let execution = Execution::new_pending(scenario_id.clone(), scenario.to_string());
        let test_id = execution.test_id.clone();

        self.executions
            .write()
            .await
            .insert(test_id.clone(), execution);
        self.scenario_executions
            .write()
            .await
            .entry(scenario_id)
            .or_default()
            .push(test_id.clone());

        Ok(test_id)
    }

    async fn get_execution(&self, test_id: &str) -> StorageResult<Option<Execution>> {
        Ok(self.executions.read().await.get(test_id).cloned())
    }

    async fn get_executions_by_scenario(&self, scenario_id: &str) -> StorageResult<Vec<Execution>> {
        let index = self.scenario_executions.read().await;
        let executions = self.executions.read().await;
        let mut out: Vec<Execution> = index
            .get(scenario_id)
            .into_iter()
            .flatten()
            .filter_map(|id| executions.get(id).cloned())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_execution(&self, test_id: &str, update: ExecutionUpdate) -> StorageResult<Execution> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(test_id)
            .ok_or_else(|| StorageError::ExecutionNotFound(test_id.to_string()))?;

        if let Some(status) = update.status {
            execution.status = status;
        }
        if let Some(plan_id) = update.plan_id {
            execution.plan_id = plan_id;
        }
        if let Some(current_step) = update.current_step {
            execution.current_step = current_step;
        }
        if let Some(total_steps) = update.total_steps {
            execution.total_steps = total_steps;
        }
        if let Some(results) = update.results {
            execution.results = results;
        }
        if let Some(report_data) = update.report_data {
            execution.report_data = report_data;
        }
        if let Some(error) = update.error {
            execution.error = error;
        }
        if let Some(completed_at) = update.completed_at {
            execution.completed_at = completed_at;
        }
        execution.updated_at = Utc::now();

        Ok(execution.clone())
    }

    async fn delete_execution(&self, test_id: &str) -> StorageResult<()> {
        let removed = self.executions.write().await.remove(test_id);
        if let Some(execution) = removed {
            let mut index = self.scenario_executions.write().await;
            if let Some(ids) = index.get_mut(&execution.scenario_id) {
                ids.retain(|id| id != test_id);
            }
        }
        Ok(())
    }

    async fn list_executions(&self) -> StorageResult<Vec<Execution>> {
        Ok(self.executions.read().await.values().cloned().collect())
    }

    async fn delete_all_executions(&self) -> StorageResult<()> {
        self.executions.write().await.clear();
        self.scenario_executions.write().await.clear();
        Ok(())
    }

    async fn save_plan(&self, plan: Plan) -> StorageResult<Plan> {
        let plan_id = plan.id.clone();
        let scenario_id = plan.scenario_id.clone();
        self.plans.write().await.insert(plan_id.clone(), plan.clone());
        let mut index = self.scenario_plans.write().await;
        let ids = index.entry(scenario_id).or_default();
        if !ids.contains(&plan_id) {
            ids.push(plan_id);
        }
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }

    async fn list_plans(&self) -> StorageResult<Vec<Plan>> {
        Ok(self.plans.read().await.values().cloned().collect())
    }

    async fn get_plans_by_scenario(&self, scenario_id: &str) -> StorageResult<Vec<Plan>> {
        let index = self.scenario_plans.read().await;
        let plans = self.plans.read().await;
        Ok(index
            .get(scenario_id)
            .into_iter()
            .flatten()
            .filter_map(|id| plans.get(id).cloned())
            .collect())
    }

    async fn update_plan(&self, plan_id: &str, update: PlanUpdate) -> StorageResult<Plan> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.to_string()))?;

        if let Some(name) = update.name {
            plan.name = name;
        }
        if let Some(phase) = update.phase {
            plan.phase = plan.phase.advance_to(phase);
        }
        if let Some(steps) = update.steps {
            plan.steps = steps;
        }
        if let Some(refinement_history) = update.refinement_history {
            plan.refinement_history = refinement_history;
        }

        Ok(plan.clone())
    }

    async fn delete_plan(&self, plan_id: &str) -> StorageResult<()> {
        let removed = self.plans.write().await.remove(plan_id);
        if let Some(plan) = removed {
            let mut index = self.scenario_plans.write().await;
            if let Some(ids) = index.get_mut(&plan.scenario_id) {
                ids.retain(|id| id != plan_id);
            }
        }
        Ok(())
    }

    async fn delete_all_plans(&self) -> StorageResult<()> {
        self.plans.write().await.clear();
        self.scenario_plans.write().await.clear();
        Ok(())
    }

    async fn config_get(&self, key: &str) -> StorageResult<Option<ConfigEntry>> {
        Ok(self.config.read().await.get(key).cloned())
    }

    async fn config_set(&self, key: &str, value: Value, description: Option<String>) -> StorageResult<ConfigEntry> {
        let mut config = self.config.write().await;
        let now = Utc::now();
        let entry = config
            .entry(key.to_string())
            .and_modify(|e| {
                e.value = value.clone();
                e.updated_at = now;
                if description.is_some() {
                    e.description = description.clone();
                }
            })
            .or_insert_with(|| ConfigEntry {
                key: key.to_string(),
                value,
                description,
                created_at: now,
                updated_at: now,
            });
        Ok(entry.clone())
    }

    async fn config_get_all(&self, prefix: &str) -> StorageResult<Vec<ConfigEntry>> {
        Ok(self
            .config
            .read()
            .await
            .values()
            .filter(|e| e.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn config_delete(&self, key: &str) -> StorageResult<()> {
        self.config.write().await.remove(key);
        Ok(())
    }

    async fn config_delete_all(&self, prefix: &str) -> StorageResult<()> {
        self.config.write().await.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
