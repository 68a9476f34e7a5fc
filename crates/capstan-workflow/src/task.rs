//! Task record and runner
//!
//! A task is a persisted unit of workflow execution. It carries the step
//! list resolved from the registry, a config snapshot, and per-step statuses,
//! and is written back to storage after every transition so a restarted
//! process can observe partially completed work.

use crate::config::Config;
use crate::error::{Result, StepError, WorkflowError};
use crate::registry::WorkflowRegistry;
use crate::step::{Step, TaskOut};
use crate::storage::{Storage, TASKS_BUCKET};
use crate::sync::CancelSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{error, info};
use uuid::Uuid;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Per-step state within a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StepState {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

/// Status of one step within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub name: String,
    pub state: StepState,
    #[serde(default)]
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepStatus {
    fn not_started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StepState::NotStarted,
            error_message: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    fn start(&mut self) {
        self.state = StepState::Running;
        self.started_at = Some(Utc::now());
    }

    fn succeed(&mut self) {
        self.state = StepState::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.state = StepState::Failed;
        self.error_message = message.into();
        self.finished_at = Some(Utc::now());
    }
}

/// Serializable view of a task, as written to storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub status: TaskState,
    pub steps_statuses: Vec<StepStatus>,
    pub config: Config,
    pub created_at: DateTime<Utc>,
}

/// A persisted unit of workflow execution
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub workflow_type: String,
    pub status: TaskState,
    pub step_statuses: Vec<StepStatus>,
    pub config: Config,
    pub created_at: DateTime<Utc>,
    steps: Vec<Arc<dyn Step>>,
    storage: Arc<dyn Storage>,
}

impl Task {
    /// Create a task for a registered workflow and persist its initial record.
    pub async fn new(
        workflow_type: &str,
        registry: &WorkflowRegistry,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let steps = registry
            .steps(workflow_type)
            .ok_or_else(|| WorkflowError::NotFound(workflow_type.to_string()))?
            .to_vec();

        let task = Self {
            id: Uuid::new_v4().simple().to_string(),
            workflow_type: workflow_type.to_string(),
            status: TaskState::Queued,
            step_statuses: steps
                .iter()
                .map(|s| StepStatus::not_started(s.name()))
                .collect(),
            config: Config::default(),
            created_at: Utc::now(),
            steps,
            storage,
        };

        task.persist().await?;
        Ok(task)
    }

    fn record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            workflow_type: self.workflow_type.clone(),
            status: self.status,
            steps_statuses: self.step_statuses.clone(),
            config: self.config.clone(),
            created_at: self.created_at,
        }
    }

    async fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.record())?;
        self.storage.put(TASKS_BUCKET, &self.id, &bytes).await?;
        Ok(())
    }

    /// Run all steps in order against a copy of `config`.
    ///
    /// On the first failure, previously succeeded steps are rolled back in
    /// reverse order; rollback errors are logged, never propagated. The task
    /// record is persisted after every step transition.
    pub async fn run(
        &mut self,
        cancel: CancelSignal,
        config: Config,
        mut out: TaskOut,
    ) -> Result<()> {
        self.config = config;
        self.status = TaskState::Running;
        self.persist().await?;

        let banner = format!("Starting {} workflow, task {}\n", self.workflow_type, self.id);
        out.write_all(banner.as_bytes()).await?;

        let steps = self.steps.clone();
        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                self.step_statuses[index].fail("cancelled before start");
                self.status = TaskState::Failed;
                self.persist().await?;
                return Err(WorkflowError::Cancelled);
            }

            self.step_statuses[index].start();
            self.persist().await?;

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(StepError::Cancelled),
                res = step.run(&cancel, &mut out, &mut self.config) => res,
            };

            match result {
                Ok(()) => {
                    self.step_statuses[index].succeed();
                    self.persist().await?;
                }
                Err(err) => {
                    error!(task = %self.id, step = %step.name(), error = %err, "step failed");
                    self.step_statuses[index].fail(err.to_string());
                    self.status = TaskState::Failed;
                    self.persist().await?;

                    self.rollback_through(&cancel, &mut out, index).await;
                    self.persist().await?;

                    return Err(WorkflowError::StepFailed {
                        step: step.name().to_string(),
                        source: err,
                    });
                }
            }
        }

        self.status = TaskState::Succeeded;
        self.persist().await?;
        info!(task = %self.id, workflow = %self.workflow_type, "task finished");
        Ok(())
    }

    /// Roll back every step before `failed_index` that succeeded, newest first.
    async fn rollback_through(
        &mut self,
        cancel: &CancelSignal,
        out: &mut TaskOut,
        failed_index: usize,
    ) {
        let steps = self.steps.clone();
        for index in (0..failed_index).rev() {
            if self.step_statuses[index].state != StepState::Succeeded {
                continue;
            }

            let step = &steps[index];
            if let Err(err) = step.rollback(cancel, &mut **out, &mut self.config).await {
                error!(task = %self.id, step = %step.name(), error = %err, "rollback failed");
            }
            self.step_statuses[index].state = StepState::RolledBack;
        }
    }

    /// Run the task on its own tokio task. The returned channel yields
    /// exactly one value: the run result.
    pub fn spawn_run(
        mut self,
        cancel: CancelSignal,
        config: Config,
        out: TaskOut,
    ) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = self.run(cancel, config, out).await;
            let _ = tx.send(result);
        });
        rx
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("workflow_type", &self.workflow_type)
            .field("status", &self.status)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
