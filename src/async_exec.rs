//! `ExecutionManager`, spec.md §4.12: starts an `AdaptiveOrchestrator` run on
//! a background task per `testId` and mirrors its progress into Storage.
//!
//! Grounded on the teacher's `hot_reload::manager` idiom of cloning the
//! `Arc` fields a background task needs before `tokio::spawn(async move {...})`.

use crate::model::{Execution, ExecutionStatus, Plan, Report};
use crate::orchestrator::{AdaptiveOrchestrator, ProgressSink};
use crate::storage::{ExecutionUpdate, Storage, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Mirrors orchestrator progress into a `testId`'s Execution record.
struct StorageProgressSink {
    storage: Arc<dyn Storage>,
    test_id: String,
}

#[async_trait]
impl ProgressSink for StorageProgressSink {
    async fn on_progress(&self, current_step: usize, total_steps: usize, results: &[crate::model::ExecutionResult]) {
        let update = ExecutionUpdate {
            status: Some(ExecutionStatus::Running),
            current_step: Some(Some(current_step)),
            total_steps: Some(Some(total_steps)),
            results: Some(results.to_vec()),
            ..Default::default()
        };
        if let Err(error) = self.storage.update_execution(&self.test_id, update).await {
            warn!(%error, test_id = %self.test_id, "failed to persist execution progress");
        }
    }
}

/// Creates Executions, runs orchestrators in the background, and tracks
/// cancellation flags per `testId`.
pub struct ExecutionManager {
    storage: Arc<dyn Storage>,
    cancellations: DashMap<String, Arc<AtomicBool>>,
}

impl ExecutionManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cancellations: DashMap::new(),
        }
    }

    /// Creates a `pending` Execution, starts `orchestrator` on a background
    /// task, and returns immediately with `(testId, scenarioId)`. The
    /// background task advances the Execution through `running` and into a
    /// terminal state as `orchestrator` progresses.
    pub async fn execute_async(&self, scenario: &str, plan: Plan, orchestrator: AdaptiveOrchestrator) -> StorageResult<(String, String)> {
        let test_id = self.storage.create_execution(scenario).await?;
        let execution = self
            .storage
            .get_execution(&test_id)
            .await?
            .ok_or_else(|| crate::storage::StorageError::ExecutionNotFound(test_id.clone()))?;
        let scenario_id = execution.scenario_id.clone();

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancellations.insert(test_id.clone(), cancel_flag.clone());

        let storage = self.storage.clone();
        let test_id_for_task = test_id.clone();
        let total_steps = plan.steps.len();
        let mut orchestrator = orchestrator.with_cancel_flag(cancel_flag);

        tokio::spawn(async move {
            if let Err(error) = storage
                .update_execution(
                    &test_id_for_task,
                    ExecutionUpdate {
                        status: Some(ExecutionStatus::Running),
                        total_steps: Some(Some(total_steps)),
                        current_step: Some(Some(0)),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(%error, test_id = %test_id_for_task, "failed to mark execution running");
            }

            let sink = StorageProgressSink {
                storage: storage.clone(),
                test_id: test_id_for_task.clone(),
            };
            let report = orchestrator.run(plan, &test_id_for_task, &sink).await;
            finish_execution(storage.as_ref(), &test_id_for_task, report).await;
        });

        Ok((test_id, scenario_id))
    }

    /// Runs `orchestrator` to completion on the current task, persisting the
    /// same terminal-state transitions as [`Self::execute_async`], and
    /// returns the finished [`Report`] directly.
    pub async fn execute_sync(&self, scenario: &str, plan: Plan, orchestrator: AdaptiveOrchestrator) -> StorageResult<Report> {
        let test_id = self.storage.create_execution(scenario).await?;
        self.storage
            .update_execution(
                &test_id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Running),
                    total_steps: Some(Some(plan.steps.len())),
                    current_step: Some(Some(0)),
                    ..Default::default()
                },
            )
            .await?;

        let sink = StorageProgressSink {
            storage: self.storage.clone(),
            test_id: test_id.clone(),
        };
        let mut orchestrator = orchestrator;
        let report = orchestrator.run(plan, &test_id, &sink).await;
        finish_execution(self.storage.as_ref(), &test_id, report.clone()).await;
        Ok(report)
    }

    /// Requests cancellation of a running execution; the background task
    /// observes this at the next step boundary (spec.md §5). Returns `false`
    /// if `test_id` is unknown or already finished.
    pub fn cancel(&self, test_id: &str) -> bool {
        match self.cancellations.get(test_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, test_id: &str) -> StorageResult<Option<Execution>> {
        self.storage.get_execution(test_id).await
    }
}

async fn finish_execution(storage: &dyn Storage, test_id: &str, report: Report) {
    let status = if report.summary.success { ExecutionStatus::Completed } else { ExecutionStatus::Failed };
    let update = ExecutionUpdate {
        status: Some(status),
        plan_id: Some(report.plan_id.clone()),
        results: Some(report.results.clone()),
        error: Some(report.summary.reason.clone()),
        report_data: Some(Some(report)),
        completed_at: Some(Some(Utc::now())),
        ..Default::default()
    };
    if let Err(error) = storage.update_execution(test_id, update).await {
        warn!(%error, test_id, "failed to persist terminal execution state");
    }
}
