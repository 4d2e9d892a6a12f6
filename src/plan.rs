//! Plan projection: the task list of the live run.
//!
//! `plan_generated` and `plan_updated` rebuild the plan wholesale; task-level
//! events look tasks up by id and are no-ops for ids the plan does not hold.
//! At most one task is `in_progress` at any time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::protocol::{Event, EventKind, TaskSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in_progress" | "running" | "active" => TaskStatus::InProgress,
            "completed" | "done" | "complete" => TaskStatus::Completed,
            "failed" | "error" => TaskStatus::Failed,
            "blocked" => TaskStatus::Blocked,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    Approved,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanTask {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub order: u32,
    pub expected_artifacts: Vec<String>,
    pub actual_artifacts: Vec<String>,
    pub assigned_to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&TaskSpec> for PlanTask {
    fn from(spec: &TaskSpec) -> Self {
        Self {
            id: spec.id.clone(),
            title: spec.title.clone(),
            description: spec.description.clone(),
            status: spec
                .status
                .as_deref()
                .map(TaskStatus::parse_lenient)
                .unwrap_or_default(),
            order: spec.order,
            expected_artifacts: spec.expected_artifacts.clone(),
            actual_artifacts: Vec::new(),
            assigned_to: spec.assigned_to.clone(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub run_id: String,
    pub status: PlanStatus,
    /// Sorted by `order`.
    pub tasks: Vec<PlanTask>,
    pub current_task_id: Option<String>,
}

impl ExecutionPlan {
    fn build(id: String, run_id: String, specs: &[TaskSpec]) -> Self {
        let mut tasks: Vec<PlanTask> = specs.iter().map(PlanTask::from).collect();
        tasks.sort_by_key(|t| t.order);

        // A payload may claim several running tasks; keep the first.
        let mut current_task_id = None;
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::InProgress {
                if current_task_id.is_none() {
                    current_task_id = Some(task.id.clone());
                } else {
                    task.status = TaskStatus::Pending;
                }
            }
        }

        Self {
            id,
            run_id,
            status: PlanStatus::Draft,
            tasks,
            current_task_id,
        }
    }

    pub fn task(&self, id: &str) -> Option<&PlanTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: &str) -> Option<&mut PlanTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn current_task(&self) -> Option<&PlanTask> {
        self.current_task_id.as_deref().and_then(|id| self.task(id))
    }

    /// Lowest-order pending task.
    pub fn next_task(&self) -> Option<&PlanTask> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Pending)
    }

    /// (completed, total)
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        (done, self.tasks.len())
    }

    fn clear_current(&mut self, id: &str) {
        if self.current_task_id.as_deref() == Some(id) {
            self.current_task_id = None;
        }
    }
}

/// Folds plan-related events into an [`ExecutionPlan`].
#[derive(Debug, Default)]
pub struct PlanProjection {
    plan: Option<ExecutionPlan>,
}

impl PlanProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    /// Apply an event the run store has already accepted.
    pub fn apply(&mut self, event: &Event) {
        match &event.kind {
            EventKind::PlanGenerated { plan_id, tasks, .. } => {
                self.rebuild(event, plan_id.as_deref(), tasks);
                if let Some(plan) = self.plan.as_mut() {
                    plan.status = PlanStatus::Draft;
                }
            }
            EventKind::PlanUpdated { plan_id, tasks } => {
                let status = self.plan.as_ref().map(|p| p.status);
                self.rebuild(event, plan_id.as_deref(), tasks);
                if let (Some(plan), Some(status)) = (self.plan.as_mut(), status) {
                    plan.status = status;
                }
            }
            EventKind::PlanApproved { .. } => self.set_status(PlanStatus::Approved),
            EventKind::ExecutionStarted { .. } => self.set_status(PlanStatus::Executing),
            EventKind::RunCompleted { .. } => self.set_status(PlanStatus::Completed),
            EventKind::TaskStarted { task_id, worker } => {
                self.start_task(task_id, worker.as_deref(), event.timestamp)
            }
            EventKind::TaskCompleted { task_id, artifacts } => {
                self.finish_task(task_id, TaskStatus::Completed, artifacts, event.timestamp)
            }
            EventKind::TaskFailed { task_id, .. } => {
                self.finish_task(task_id, TaskStatus::Failed, &[], event.timestamp)
            }
            EventKind::InitiationStarted { .. }
            | EventKind::RunInitiated { .. }
            | EventKind::RunCleared => self.plan = None,

            EventKind::Thought { .. }
            | EventKind::PlanRejected { .. }
            | EventKind::ApprovalRequested { .. }
            | EventKind::ExecutiveSummary { .. }
            | EventKind::RetryAttempt { .. }
            | EventKind::QualityGateStart { .. }
            | EventKind::QualityGateResult { .. }
            | EventKind::PhaseStart { .. }
            | EventKind::PhaseEnd { .. }
            | EventKind::Action { .. }
            | EventKind::FileOperation { .. }
            | EventKind::Log { .. }
            | EventKind::Info { .. }
            | EventKind::Warning { .. }
            | EventKind::AgentError { .. }
            | EventKind::RunStatusChange { .. }
            | EventKind::Unknown { .. }
            | EventKind::InitiationFailed { .. }
            | EventKind::ApprovalFailed { .. }
            | EventKind::ConnectionLost { .. }
            | EventKind::ContextFileAdded { .. }
            | EventKind::ContextFileRemoved { .. }
            | EventKind::DeliverableRemoved { .. } => {}
        }
    }

    fn rebuild(&mut self, event: &Event, plan_id: Option<&str>, tasks: &[TaskSpec]) {
        if tasks.is_empty() && self.plan.as_ref().is_some_and(|p| !p.tasks.is_empty()) {
            debug!(event_type = event.type_name(), "Empty task list, keeping current plan");
            return;
        }
        let id = plan_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("plan-{}", event.run_id));
        self.plan = Some(ExecutionPlan::build(id, event.run_id.clone(), tasks));
    }

    fn set_status(&mut self, status: PlanStatus) {
        if let Some(plan) = self.plan.as_mut() {
            plan.status = status;
        }
    }

    fn start_task(&mut self, task_id: &str, worker: Option<&str>, at: DateTime<Utc>) {
        let Some(plan) = self.plan.as_mut() else {
            return;
        };
        if plan.task(task_id).is_none() {
            debug!(task_id, "task_started for unknown task");
            return;
        }

        // Previous task goes back to pending; completion is never inferred.
        if let Some(prev) = plan.current_task_id.take()
            && prev != task_id
            && let Some(task) = plan.task_mut(&prev)
            && task.status == TaskStatus::InProgress
        {
            task.status = TaskStatus::Pending;
        }

        if let Some(task) = plan.task_mut(task_id) {
            task.status = TaskStatus::InProgress;
            task.started_at = Some(at);
            if let Some(worker) = worker {
                task.assigned_to = Some(worker.to_string());
            }
        }
        plan.current_task_id = Some(task_id.to_string());
        if matches!(plan.status, PlanStatus::Draft | PlanStatus::Approved) {
            plan.status = PlanStatus::Executing;
        }
    }

    fn finish_task(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        artifacts: &[String],
        at: DateTime<Utc>,
    ) {
        let Some(plan) = self.plan.as_mut() else {
            return;
        };
        let Some(task) = plan.task_mut(task_id) else {
            debug!(task_id, "Task event for unknown task");
            return;
        };
        task.status = status;
        task.completed_at = Some(at);
        if !artifacts.is_empty() {
            task.actual_artifacts = artifacts.to_vec();
        }
        plan.clear_current(task_id);

        if status == TaskStatus::Failed {
            plan.status = PlanStatus::Failed;
        } else if plan.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            plan.status = PlanStatus::Completed;
        }
    }
}
