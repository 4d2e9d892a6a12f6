use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// `source` used for events synthesised by this client.
pub const CLIENT_SOURCE: &str = "client";

/// A classified event, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Run the event belongs to. Empty for lifecycle events raised before a
    /// run id exists.
    pub run_id: String,
    /// Advisory only; events are applied in arrival order.
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub kind: EventKind,
}

impl Event {
    pub fn new(
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp,
            source: source.into(),
            kind,
        }
    }

    /// An event raised by the client itself, stamped with the wall clock.
    pub fn local(run_id: Option<&str>, kind: EventKind) -> Self {
        Self::new(run_id.unwrap_or_default(), Utc::now(), CLIENT_SOURCE, kind)
    }

    /// Wire (or local) type name.
    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }
}

/// Severity of a log-style event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lenient parse; anything unrecognised is `Info`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" | "critical" | "fatal" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// How a phase ended, normalised from the free-form `phase_end.status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Approved,
    Rejected,
    Failed,
    /// A status value this client does not know; carries it verbatim.
    Other(String),
}

impl PhaseOutcome {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "APPROVED" | "APROBADO" | "SUCCESS" | "PASSED" => PhaseOutcome::Approved,
            "REJECTED" | "RECHAZADO" => PhaseOutcome::Rejected,
            "ERROR" | "FAILED" | "FALLIDO" => PhaseOutcome::Failed,
            _ => PhaseOutcome::Other(status.to_string()),
        }
    }
}

/// Kind of `file_operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperationKind {
    Create,
    Update,
    Delete,
    Other(String),
}

impl FileOperationKind {
    fn parse(op: &str) -> Self {
        match op.trim().to_ascii_lowercase().as_str() {
            "create" | "created" | "write" | "writefile" => FileOperationKind::Create,
            "update" | "updated" | "modify" | "edit" => FileOperationKind::Update,
            "delete" | "deleted" | "remove" => FileOperationKind::Delete,
            other => FileOperationKind::Other(other.to_string()),
        }
    }
}

/// Metadata about a user-supplied document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub name: String,
    pub size: u64,
    pub content: Option<String>,
}

/// One task as described by a plan payload, before projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub order: u32,
    pub expected_artifacts: Vec<String>,
    pub assigned_to: Option<String>,
}

/// A `data` payload that does not fit the shape its `type` requires.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed '{kind}' payload: {message}")]
pub struct PayloadError {
    pub kind: String,
    pub message: String,
}

/// Every event the pipeline understands.
///
/// Remote variants come from [`EventKind::from_wire`]; the client-local
/// lifecycle variants are only ever constructed by this crate, so a server
/// frame cannot impersonate them.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    // ── Remote ──────────────────────────────────────────────────────
    Thought {
        content: String,
    },
    PlanGenerated {
        plan_id: Option<String>,
        message: Option<String>,
        tasks: Vec<TaskSpec>,
    },
    PlanUpdated {
        plan_id: Option<String>,
        tasks: Vec<TaskSpec>,
    },
    PlanApproved {
        phase: Option<String>,
        message: Option<String>,
        user_response: Option<String>,
    },
    PlanRejected {
        phase: Option<String>,
        message: Option<String>,
        user_response: Option<String>,
    },
    ApprovalRequested {
        message: Option<String>,
        phase_completed: Option<String>,
        phase_requested: Option<String>,
    },
    ExecutiveSummary {
        summary: String,
        agent_role: Option<String>,
    },
    RetryAttempt {
        attempt: Option<u32>,
        max_attempts: Option<u32>,
        feedback: Option<String>,
    },
    QualityGateStart {
        name: Option<String>,
    },
    QualityGateResult {
        success: bool,
        message: Option<String>,
    },
    PhaseStart {
        name: String,
    },
    PhaseEnd {
        name: Option<String>,
        outcome: PhaseOutcome,
        reason: Option<String>,
    },
    Action {
        tool: String,
        path: Option<String>,
        content_length: Option<u64>,
        args: Value,
    },
    FileOperation {
        operation: FileOperationKind,
        path: String,
        size: Option<u64>,
        content: Option<String>,
        created_by: Option<String>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Info {
        message: String,
    },
    Warning {
        message: String,
    },
    AgentError {
        message: String,
    },
    RunStatusChange {
        phase: Option<String>,
        message: Option<String>,
    },
    ExecutionStarted {
        message: Option<String>,
    },
    RunCompleted {
        message: Option<String>,
    },
    TaskStarted {
        task_id: String,
        worker: Option<String>,
    },
    TaskCompleted {
        task_id: String,
        artifacts: Vec<String>,
    },
    TaskFailed {
        task_id: String,
        reason: Option<String>,
    },
    /// Well-formed frame with a `type` this client does not know.
    Unknown {
        type_name: String,
        data: Value,
    },

    // ── Client-local ────────────────────────────────────────────────
    InitiationStarted {
        document: String,
    },
    RunInitiated {
        message: Option<String>,
        document: Option<DocumentInfo>,
    },
    InitiationFailed {
        reason: String,
    },
    ApprovalFailed {
        reason: String,
    },
    ConnectionLost {
        reason: String,
    },
    RunCleared,
    ContextFileAdded {
        document: DocumentInfo,
    },
    ContextFileRemoved {
        file_id: String,
    },
    DeliverableRemoved {
        file_id: String,
    },
}

impl EventKind {
    /// Parse a remote `type` + `data` pair.
    ///
    /// Unknown types yield `Unknown`; a known type whose payload has the wrong
    /// shape yields a [`PayloadError`] so the caller can downgrade it.
    pub fn from_wire(type_name: &str, data: Value) -> Result<Self, PayloadError> {
        let err = |e: serde_json::Error| PayloadError {
            kind: type_name.to_string(),
            message: e.to_string(),
        };
        let data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let kind = match type_name {
            "thought" => {
                let d: ContentData = serde_json::from_value(data).map_err(err)?;
                EventKind::Thought { content: d.content }
            }
            "plan_generated" => {
                let mut d: PlanData = serde_json::from_value(data).map_err(err)?;
                let (plan_id, message) = (d.plan_id.take(), d.message.take());
                EventKind::PlanGenerated {
                    plan_id,
                    message,
                    tasks: d.into_tasks(),
                }
            }
            "plan_updated" => {
                let mut d: PlanData = serde_json::from_value(data).map_err(err)?;
                let plan_id = d.plan_id.take();
                EventKind::PlanUpdated {
                    plan_id,
                    tasks: d.into_tasks(),
                }
            }
            "plan_approved" => {
                let d: DecisionData = serde_json::from_value(data).map_err(err)?;
                EventKind::PlanApproved {
                    phase: d.phase_approved,
                    message: d.message,
                    user_response: d.user_response,
                }
            }
            "plan_rejected" => {
                let d: DecisionData = serde_json::from_value(data).map_err(err)?;
                EventKind::PlanRejected {
                    phase: d.phase_rejected,
                    message: d.message,
                    user_response: d.user_response,
                }
            }
            "design_phase_approval_request" => {
                let d: ApprovalRequestData = serde_json::from_value(data).map_err(err)?;
                EventKind::ApprovalRequested {
                    message: d.message,
                    phase_completed: d.phase_completed,
                    phase_requested: d.phase_requested,
                }
            }
            "executive_summary" => {
                let d: SummaryData = serde_json::from_value(data).map_err(err)?;
                EventKind::ExecutiveSummary {
                    summary: d.summary,
                    agent_role: d.agent_role,
                }
            }
            "retry_attempt" => {
                let d: RetryData = serde_json::from_value(data).map_err(err)?;
                EventKind::RetryAttempt {
                    attempt: d.attempt.as_ref().and_then(value_as_u32),
                    max_attempts: d.max_attempts.as_ref().and_then(value_as_u32),
                    feedback: d.feedback,
                }
            }
            "quality_gate_start" => {
                let d: NameData = serde_json::from_value(data).map_err(err)?;
                EventKind::QualityGateStart { name: d.name }
            }
            "quality_gate_result" => {
                let d: GateResultData = serde_json::from_value(data).map_err(err)?;
                EventKind::QualityGateResult {
                    success: d.success,
                    message: d.message,
                }
            }
            "phase_start" => {
                let d: NameData = serde_json::from_value(data).map_err(err)?;
                EventKind::PhaseStart {
                    name: d.name.unwrap_or_else(|| "unknown".to_string()),
                }
            }
            "phase_end" => {
                let d: PhaseEndData = serde_json::from_value(data).map_err(err)?;
                EventKind::PhaseEnd {
                    name: d.name,
                    outcome: PhaseOutcome::parse(d.status.as_deref().unwrap_or_default()),
                    reason: d.reason,
                }
            }
            "action" => {
                let d: ActionData = serde_json::from_value(data).map_err(err)?;
                let path = d
                    .args
                    .get("path")
                    .and_then(Value::as_str)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string);
                let content_length = d.args.get("content_length").and_then(Value::as_u64);
                EventKind::Action {
                    tool: d.tool.unwrap_or_else(|| "unknown".to_string()),
                    path,
                    content_length,
                    args: d.args,
                }
            }
            "file_operation" => {
                let d: FileOperationData = serde_json::from_value(data).map_err(err)?;
                let path = d.path.filter(|p| !p.is_empty()).ok_or_else(|| PayloadError {
                    kind: type_name.to_string(),
                    message: "missing file path".to_string(),
                })?;
                EventKind::FileOperation {
                    operation: FileOperationKind::parse(d.operation.as_deref().unwrap_or("create")),
                    path,
                    size: d.size,
                    content: d.content,
                    created_by: d.created_by,
                }
            }
            "log" => {
                let d: LogData = serde_json::from_value(data).map_err(err)?;
                EventKind::Log {
                    level: LogLevel::parse_lenient(d.level.as_deref().unwrap_or("info")),
                    message: d.message.unwrap_or_default(),
                }
            }
            "info" => EventKind::Info {
                message: message_of(data).map_err(err)?,
            },
            "warning" => EventKind::Warning {
                message: message_of(data).map_err(err)?,
            },
            "error" => EventKind::AgentError {
                message: message_of(data).map_err(err)?,
            },
            "run_status_change" => {
                let d: RunStatusData = serde_json::from_value(data).map_err(err)?;
                EventKind::RunStatusChange {
                    phase: d.phase.or(d.status),
                    message: d.message,
                }
            }
            "execution_started" => EventKind::ExecutionStarted {
                message: optional_message_of(data).map_err(err)?,
            },
            "run_completed" => EventKind::RunCompleted {
                message: optional_message_of(data).map_err(err)?,
            },
            "task_started" => {
                let d: TaskData = serde_json::from_value(data).map_err(err)?;
                EventKind::TaskStarted {
                    task_id: d.require_id(type_name)?,
                    worker: d.worker,
                }
            }
            "task_completed" => {
                let d: TaskData = serde_json::from_value(data).map_err(err)?;
                EventKind::TaskCompleted {
                    task_id: d.require_id(type_name)?,
                    artifacts: d.artifacts,
                }
            }
            "task_failed" => {
                let d: TaskData = serde_json::from_value(data).map_err(err)?;
                EventKind::TaskFailed {
                    task_id: d.require_id(type_name)?,
                    reason: d.reason,
                }
            }
            other => EventKind::Unknown {
                type_name: other.to_string(),
                data,
            },
        };
        Ok(kind)
    }

    /// The `type` string this kind travels (or would travel) under.
    pub fn type_name(&self) -> &str {
        match self {
            EventKind::Thought { .. } => "thought",
            EventKind::PlanGenerated { .. } => "plan_generated",
            EventKind::PlanUpdated { .. } => "plan_updated",
            EventKind::PlanApproved { .. } => "plan_approved",
            EventKind::PlanRejected { .. } => "plan_rejected",
            EventKind::ApprovalRequested { .. } => "design_phase_approval_request",
            EventKind::ExecutiveSummary { .. } => "executive_summary",
            EventKind::RetryAttempt { .. } => "retry_attempt",
            EventKind::QualityGateStart { .. } => "quality_gate_start",
            EventKind::QualityGateResult { .. } => "quality_gate_result",
            EventKind::PhaseStart { .. } => "phase_start",
            EventKind::PhaseEnd { .. } => "phase_end",
            EventKind::Action { .. } => "action",
            EventKind::FileOperation { .. } => "file_operation",
            EventKind::Log { .. } => "log",
            EventKind::Info { .. } => "info",
            EventKind::Warning { .. } => "warning",
            EventKind::AgentError { .. } => "error",
            EventKind::RunStatusChange { .. } => "run_status_change",
            EventKind::ExecutionStarted { .. } => "execution_started",
            EventKind::RunCompleted { .. } => "run_completed",
            EventKind::TaskStarted { .. } => "task_started",
            EventKind::TaskCompleted { .. } => "task_completed",
            EventKind::TaskFailed { .. } => "task_failed",
            EventKind::Unknown { type_name, .. } => type_name.as_str(),
            EventKind::InitiationStarted { .. } => "initiation_started",
            EventKind::RunInitiated { .. } => "run_initiated",
            EventKind::InitiationFailed { .. } => "initiation_failed",
            EventKind::ApprovalFailed { .. } => "approval_failed",
            EventKind::ConnectionLost { .. } => "connection_lost",
            EventKind::RunCleared => "run_cleared",
            EventKind::ContextFileAdded { .. } => "context_file_added",
            EventKind::ContextFileRemoved { .. } => "context_file_removed",
            EventKind::DeliverableRemoved { .. } => "deliverable_removed",
        }
    }

    /// Lifecycle events establish or remove the live run id, so they bypass
    /// run-id matching.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::InitiationStarted { .. }
                | EventKind::RunInitiated { .. }
                | EventKind::InitiationFailed { .. }
                | EventKind::RunCleared
        )
    }
}

// ── Payload shapes ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContentData {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NameData {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageData {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecisionData {
    message: Option<String>,
    user_response: Option<String>,
    phase_approved: Option<String>,
    phase_rejected: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApprovalRequestData {
    message: Option<String>,
    phase_completed: Option<String>,
    phase_requested: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SummaryData {
    summary: String,
    agent_role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetryData {
    // Numbers, or numeric strings.
    attempt: Option<Value>,
    max_attempts: Option<Value>,
    feedback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GateResultData {
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PhaseEndData {
    name: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActionData {
    tool: Option<String>,
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileOperationData {
    #[serde(alias = "op")]
    operation: Option<String>,
    #[serde(alias = "file_path")]
    path: Option<String>,
    size: Option<u64>,
    content: Option<String>,
    #[serde(alias = "creator", alias = "agent")]
    created_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogData {
    level: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunStatusData {
    #[serde(alias = "current_phase")]
    phase: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskData {
    #[serde(alias = "id")]
    task_id: Option<Value>,
    #[serde(alias = "assigned_to", alias = "agent")]
    worker: Option<String>,
    artifacts: Vec<String>,
    reason: Option<String>,
}

impl TaskData {
    fn require_id(&self, type_name: &str) -> Result<String, PayloadError> {
        self.task_id
            .as_ref()
            .and_then(value_as_id)
            .ok_or_else(|| PayloadError {
                kind: type_name.to_string(),
                message: "missing task_id".to_string(),
            })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanData {
    #[serde(alias = "id")]
    plan_id: Option<String>,
    message: Option<String>,
    tasks: Option<Vec<TaskWire>>,
    plan: Option<Vec<TaskWire>>,
}

/// Planner agents send bare strings; the orchestrator may send objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskWire {
    Title(String),
    Detailed(TaskObject),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskObject {
    id: Option<Value>,
    #[serde(alias = "name")]
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    order: Option<u32>,
    expected_artifacts: Vec<String>,
    #[serde(alias = "worker")]
    assigned_to: Option<String>,
}

impl PlanData {
    /// `tasks` wins over `plan` unless it is empty.
    fn into_tasks(self) -> Vec<TaskSpec> {
        let wire = match (self.tasks, self.plan) {
            (Some(tasks), _) if !tasks.is_empty() => tasks,
            (_, Some(plan)) => plan,
            (Some(tasks), None) => tasks,
            (None, None) => Vec::new(),
        };

        wire.into_iter()
            .enumerate()
            .map(|(index, task)| {
                let position = index as u32;
                match task {
                    TaskWire::Title(title) => TaskSpec {
                        id: format!("task-{}", index + 1),
                        title,
                        description: None,
                        status: None,
                        order: position,
                        expected_artifacts: Vec::new(),
                        assigned_to: None,
                    },
                    TaskWire::Detailed(obj) => TaskSpec {
                        id: obj
                            .id
                            .as_ref()
                            .and_then(value_as_id)
                            .unwrap_or_else(|| format!("task-{}", index + 1)),
                        title: obj
                            .title
                            .or_else(|| obj.description.clone())
                            .unwrap_or_else(|| format!("Task {}", index + 1)),
                        description: obj.description,
                        status: obj.status,
                        order: obj.order.unwrap_or(position),
                        expected_artifacts: obj.expected_artifacts,
                        assigned_to: obj.assigned_to,
                    },
                }
            })
            .collect()
    }
}

fn message_of(data: Value) -> Result<String, serde_json::Error> {
    Ok(optional_message_of(data)?.unwrap_or_default())
}

fn optional_message_of(data: Value) -> Result<Option<String>, serde_json::Error> {
    let d: MessageData = serde_json::from_value(data)?;
    Ok(d.message)
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
