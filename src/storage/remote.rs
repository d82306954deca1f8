//! Generic key-value storage backend.
//!
//! `RemoteKvStorage` implements [`Storage`] on top of any [`KvBackend`],
//! following the persisted-state layout of spec.md §6: entities are stored
//! as JSON values under `execution:{testId}` / `plan:{planId}` /
//! `config:{key}`, and membership sets (`scenario:executions:{scenarioId}`,
//! `scenario:plans:{scenarioId}`, `executions:all`, `plans:all`,
//! `configs:all`) track which keys exist so list/delete-all operations don't
//! require a backend that supports key scanning. Grounded on the teacher's
//! `persistence::traits::StoreFactory` — a narrow trait the concrete store
//! is built from, rather than a trait per entity.

use super::{ExecutionUpdate, PlanUpdate, Storage, StorageError, StorageResult};
use crate::model::{ConfigEntry, Execution, Plan};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

/// Minimal injectable key-value port. A production deployment wires this to
/// Redis or a similar store; tests use an in-process fake.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn set_add(&self, set_key: &str, member: &str) -> StorageResult<()>;
    async fn set_remove(&self, set_key: &str, member: &str) -> StorageResult<()>;
    async fn set_members(&self, set_key: &str) -> StorageResult<Vec<String>>;
    async fn set_clear(&self, set_key: &str) -> StorageResult<()>;
}

fn execution_key(test_id: &str) -> String {
    format!("execution:{test_id}")
}

fn plan_key(plan_id: &str) -> String {
    format!("plan:{plan_id}")
}

fn config_key(key: &str) -> String {
    format!("config:{key}")
}

fn scenario_executions_key(scenario_id: &str) -> String {
    format!("scenario:executions:{scenario_id}")
}

fn scenario_plans_key(scenario_id: &str) -> String {
    format!("scenario:plans:{scenario_id}")
}

const EXECUTIONS_ALL: &str = "executions:all";
const PLANS_ALL: &str = "plans:all";
const CONFIGS_ALL: &str = "configs:all";

/// [`Storage`] backed by a [`KvBackend`].
pub struct RemoteKvStorage<B: KvBackend> {
    backend: B,
}

impl<B: KvBackend> RemoteKvStorage<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    async fn read_execution(&self, test_id: &str) -> StorageResult<Option<Execution>> {
        match self.backend.get(&execution_key(test_id)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn write_execution(&self, execution: &Execution) -> StorageResult<()> {
        let raw = serde_json::to_string(execution).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.backend.set(&execution_key(&execution.test_id), raw).await
    }

    async fn read_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>> {
        match self.backend.get(&plan_key(plan_id)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn write_plan(&self, plan: &Plan) -> StorageResult<()> {
        let raw = serde_json::to_string(plan).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.backend.set(&plan_key(&plan.id), raw).await
    }
}

#[async_trait]
impl<B: KvBackend> Storage for RemoteKvStorage<B> {
    async fn create_execution(&self, scenario: &str) -> StorageResult<String> {
        let scenario_id = crate::model::generate_scenario_id(scenario);
        let execution = Execution::new_pending(scenario_id.clone(), scenario.to_string());
        let test_id = execution.test_id.clone();

        self.write_execution(&execution).await?;
        self.backend.set_add(EXECUTIONS_ALL, &test_id).await?;
        self.backend
            .set_add(&scenario_executions_key(&scenario_id), &test_id)
            .await?;

        Ok(test_id)
    }

    async fn get_execution(&self, test_id: &str) -> StorageResult<Option<Execution>> {
        self.read_execution(test_id).await
    }

    async fn get_executions_by_scenario(&self, scenario_id: &str) -> StorageResult<Vec<Execution>> {
        let ids = self.backend.set_members(&scenario_executions_key(scenario_id)).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(execution) = self.read_execution(&id).await? {
                out.push(execution);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_execution(&self, test_id: &str, update: ExecutionUpdate) -> StorageResult<Execution> {
        let mut execution = self
            .read_execution(test_id)
            .await?
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

        self.write_execution(&execution).await?;
        Ok(execution)
    }

    async fn delete_execution(&self, test_id: &str) -> StorageResult<()> {
        if let Some(execution) = self.read_execution(test_id).await? {
            self.backend.delete(&execution_key(test_id)).await?;
            self.backend.set_remove(EXECUTIONS_ALL, test_id).await?;
            self.backend
                .set_remove(&scenario_executions_key(&execution.scenario_id), test_id)
                .await?;
        }
        Ok(())
    }

    async fn list_executions(&self) -> StorageResult<Vec<Execution>> {
        let ids = self.backend.set_members(EXECUTIONS_ALL).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(execution) = self.read_execution(&id).await? {
                out.push(execution);
            }
        }
        Ok(out)
    }

    async fn delete_all_executions(&self) -> StorageResult<()> {
        for id in self.backend.set_members(EXECUTIONS_ALL).await? {
            self.backend.delete(&execution_key(&id)).await?;
        }
        self.backend.set_clear(EXECUTIONS_ALL).await
    }

    async fn save_plan(&self, plan: Plan) -> StorageResult<Plan> {
        self.write_plan(&plan).await?;
        self.backend.set_add(PLANS_ALL, &plan.id).await?;
        self.backend
            .set_add(&scenario_plans_key(&plan.scenario_id), &plan.id)
            .await?;
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>> {
        self.read_plan(plan_id).await
    }

    async fn list_plans(&self) -> StorageResult<Vec<Plan>> {
        let ids = self.backend.set_members(PLANS_ALL).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(plan) = self.read_plan(&id).await? {
                out.push(plan);
            }
        }
        Ok(out)
    }

    async fn get_plans_by_scenario(&self, scenario_id: &str) -> StorageResult<Vec<Plan>> {
        let ids = self.backend.set_members(&scenario_plans_key(scenario_id)).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(plan) = self.read_plan(&id).await? {
                out.push(plan);
            }
        }
        Ok(out)
    }

    async fn update_plan(&self, plan_id: &str, update: PlanUpdate) -> StorageResult<Plan> {
        let mut plan = self
            .read_plan(plan_id)
            .await?
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

        self.write_plan(&plan).await?;
        Ok(plan)
    }

    async fn delete_plan(&self, plan_id: &str) -> StorageResult<()> {
        if let Some(plan) = self.read_plan(plan_id).await? {
            self.backend.delete(&plan_key(plan_id)).await?;
            self.backend.set_remove(PLANS_ALL, plan_id).await?;
            self.backend
                .set_remove(&scenario_plans_key(&plan.scenario_id), plan_id)
                .await?;
        }
        Ok(())
    }

    async fn delete_all_plans(&self) -> StorageResult<()> {
        for id in self.backend.set_members(PLANS_ALL).await? {
            self.backend.delete(&plan_key(&id)).await?;
        }
        self.backend.set_clear(PLANS_ALL).await
    }

    async fn config_get(&self, key: &str) -> StorageResult<Option<ConfigEntry>> {
        match self.backend.get(&config_key(key)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn config_set(&self, key: &str, value: Value, description: Option<String>) -> StorageResult<ConfigEntry> {
        let now = Utc::now();
        let entry = match self.config_get(key).await? {
            Some(mut existing) => {
                existing.value = value;
                existing.updated_at = now;
                if description.is_some() {
                    existing.description = description;
                }
                existing
            }
            None => ConfigEntry {
                key: key.to_string(),
                value,
                description,
                created_at: now,
                updated_at: now,
            },
        };

        let raw = serde_json::to_string(&entry).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.backend.set(&config_key(key), raw).await?;
        self.backend.set_add(CONFIGS_ALL, key).await?;
        Ok(entry)
    }

    async fn config_get_all(&self, prefix: &str) -> StorageResult<Vec<ConfigEntry>> {
        let keys = self.backend.set_members(CONFIGS_ALL).await?;
        let mut out = Vec::new();
        for key in keys {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(entry) = self.config_get(&key).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn config_delete(&self, key: &str) -> StorageResult<()> {
        self.backend.delete(&config_key(key)).await?;
        self.backend.set_remove(CONFIGS_ALL, key).await
    }

    async fn config_delete_all(&self, prefix: &str) -> StorageResult<()> {
        for key in self.backend.set_members(CONFIGS_ALL).await? {
            if key.starts_with(prefix) {
                self.backend.delete(&config_key(&key)).await?;
                self.backend.set_remove(CONFIGS_ALL, &key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeKv {
        values: Mutex<HashMap<String, String>>,
        sets: Mutex<HashMap<String, HashSet<String>>>,
    }

    #[async_trait]
    impl KvBackend for FakeKv {
        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            Ok(self.values.lock().await.get(key).cloned())
        }

        async fn set(&self, key: &str, value: String) -> StorageResult<()> {
            self.values.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.values.lock().await.remove(key);
            Ok(())
        }

        async fn set_add(&self, set_key: &str, member: &str) -> StorageResult<()> {
            self.sets
                .lock()
                .await
                .entry(set_key.to_string())
                .or_default()
                .insert(member.to_string());
            Ok(())
        }

        async fn set_remove(&self, set_key: &str, member: &str) -> StorageResult<()> {
            if let Some(members) = self.sets.lock().await.get_mut(set_key) {
                members.remove(member);
            }
            Ok(())
        }

        async fn set_members(&self, set_key: &str) -> StorageResult<Vec<String>> {
            Ok(self
                .sets
                .lock()
                .await
                .get(set_key)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect())
        }

        async fn set_clear(&self, set_key: &str) -> StorageResult<()> {
            self.sets.lock().await.remove(set_key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn execution_round_trips_through_kv_backend() {
        let store = RemoteKvStorage::new(FakeKv::default());
        let test_id = store.create_execution("checkout flow").await.unwrap();

        let fetched = store.get_execution(&test_id).await.unwrap().unwrap();
        assert_eq!(fetched.test_id, test_id);
        assert_eq!(fetched.scenario, "checkout flow");
    }

    #[tokio::test]
    async fn delete_all_plans_removes_entries_and_membership() {
        let store = RemoteKvStorage::new(FakeKv::default());
        store.save_plan(Plan::new("scenario-a", "p1", vec![])).await.unwrap();
        store.save_plan(Plan::new("scenario-a", "p2", vec![])).await.unwrap();

        store.delete_all_plans().await.unwrap();
        assert!(store.list_plans().await.unwrap().is_empty());
        assert!(store.get_plans_by_scenario("scenario-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn config_delete_all_only_touches_matching_prefix() {
        let store = RemoteKvStorage::new(FakeKv::default());
        store
            .config_set("confidence.threshold.click", serde_json::json!(0.5), None)
            .await
            .unwrap();
        store
            .config_set("discovery.max_strategies", serde_json::json!(3), None)
            .await
            .unwrap();

        store.config_delete_all("confidence.").await.unwrap();

        assert!(store.config_get("confidence.threshold.click").await.unwrap().is_none());
        assert!(store.config_get("discovery.max_strategies").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_execution_on_unknown_id_errors() {
        let store = RemoteKvStorage::new(FakeKv::default());
        let result = store
            .update_execution("missing", ExecutionUpdate::default())
            .await;
        assert!(matches!(result, Err(StorageError::ExecutionNotFound(_))));
    }
}
