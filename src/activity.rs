//! Bounded, human-readable log of what happened during a run.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{Event, EventKind, FileOperationKind, LogLevel, PhaseOutcome};

pub const DEFAULT_ACTIVITY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_level")]
    pub level: LogLevel,
    pub source: String,
    pub text: String,
}

fn serialize_level<S: serde::Serializer>(level: &LogLevel, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    limit: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_LIMIT)
    }
}

impl ActivityLog {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    pub fn push(&mut self, entry: ActivityEntry) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Record an applied event. Returns the entry if one was written.
    pub fn record(&mut self, event: &Event) -> Option<&ActivityEntry> {
        let (level, text) = describe(&event.kind)?;
        self.push(ActivityEntry {
            timestamp: event.timestamp,
            level,
            source: event.source.clone(),
            text,
        });
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ActivityEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One line of text per event kind. `None` means the event leaves no trace.
pub fn describe(kind: &EventKind) -> Option<(LogLevel, String)> {
    use LogLevel::*;
    let entry = match kind {
        EventKind::Thought { content } => (Debug, content.clone()),
        EventKind::PlanGenerated { tasks, message, .. } => (
            Info,
            match message {
                Some(m) if !m.is_empty() => format!("Plan generated ({} tasks): {}", tasks.len(), m),
                _ => format!("Plan generated ({} tasks)", tasks.len()),
            },
        ),
        EventKind::PlanUpdated { tasks, .. } => {
            (Info, format!("Plan updated ({} tasks)", tasks.len()))
        }
        EventKind::PlanApproved { phase, .. } => (
            Info,
            match phase {
                Some(p) => format!("Approved: {}", p),
                None => "Plan approved".to_string(),
            },
        ),
        EventKind::PlanRejected { phase, message, .. } => (
            Warn,
            match (phase, message) {
                (Some(p), _) => format!("Rejected: {}", p),
                (None, Some(m)) => format!("Plan rejected: {}", m),
                (None, None) => "Plan rejected".to_string(),
            },
        ),
        EventKind::ApprovalRequested {
            message,
            phase_requested,
            ..
        } => (
            Info,
            message.clone().unwrap_or_else(|| {
                format!(
                    "Approval requested for {}",
                    phase_requested.as_deref().unwrap_or("next phase")
                )
            }),
        ),
        EventKind::ExecutiveSummary {
            summary,
            agent_role,
        } => (
            Info,
            format!(
                "Summary ({}): {}",
                agent_role.as_deref().unwrap_or("orchestrator"),
                summary
            ),
        ),
        EventKind::RetryAttempt {
            attempt,
            max_attempts,
            feedback,
        } => {
            let n = |v: &Option<u32>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".into());
            let mut text = format!("Retry {}/{}", n(attempt), n(max_attempts));
            if let Some(f) = feedback {
                text.push_str(": ");
                text.push_str(f);
            }
            (Warn, text)
        }
        EventKind::QualityGateStart { name } => (
            Info,
            format!("Quality gate started: {}", name.as_deref().unwrap_or("review")),
        ),
        EventKind::QualityGateResult { success, message } => {
            let verdict = if *success { "passed" } else { "failed" };
            let text = match message {
                Some(m) => format!("Quality gate {}: {}", verdict, m),
                None => format!("Quality gate {}", verdict),
            };
            (if *success { Info } else { Warn }, text)
        }
        EventKind::PhaseStart { name } => (Info, format!("Phase started: {}", name)),
        EventKind::PhaseEnd {
            name,
            outcome,
            reason,
        } => {
            let name = name.as_deref().unwrap_or("phase");
            let (level, word) = match outcome {
                PhaseOutcome::Approved => (Info, "approved".to_string()),
                PhaseOutcome::Rejected => (Error, "rejected".to_string()),
                PhaseOutcome::Failed => (Error, "failed".to_string()),
                PhaseOutcome::Other(s) => (Warn, format!("ended with unrecognised status {}", s)),
            };
            let text = match reason {
                Some(r) if !r.is_empty() => format!("Phase {} {}: {}", name, word, r),
                _ => format!("Phase {} {}", name, word),
            };
            (level, text)
        }
        EventKind::Action { tool, path, .. } => (
            Debug,
            match path {
                Some(p) => format!("{} {}", tool, p),
                None => tool.clone(),
            },
        ),
        EventKind::FileOperation {
            operation, path, ..
        } => {
            let verb = match operation {
                FileOperationKind::Create => "Created",
                FileOperationKind::Update => "Updated",
                FileOperationKind::Delete => "Deleted",
                FileOperationKind::Other(_) => "Touched",
            };
            (Info, format!("{} {}", verb, path))
        }
        EventKind::Log { level, message } => (*level, message.clone()),
        EventKind::Info { message } => (Info, message.clone()),
        EventKind::Warning { message } => (Warn, message.clone()),
        EventKind::AgentError { message } => (Error, message.clone()),
        EventKind::RunStatusChange { phase, message } => (
            Info,
            match (phase, message) {
                (_, Some(m)) => m.clone(),
                (Some(p), None) => format!("Phase: {}", p),
                (None, None) => return None,
            },
        ),
        EventKind::ExecutionStarted { message } => (
            Info,
            message.clone().unwrap_or_else(|| "Execution started".into()),
        ),
        EventKind::RunCompleted { message } => (
            Info,
            message.clone().unwrap_or_else(|| "Run completed".into()),
        ),
        EventKind::TaskStarted { task_id, worker } => (
            Info,
            match worker {
                Some(w) => format!("Task {} started by {}", task_id, w),
                None => format!("Task {} started", task_id),
            },
        ),
        EventKind::TaskCompleted { task_id, .. } => (Info, format!("Task {} completed", task_id)),
        EventKind::TaskFailed { task_id, reason } => (
            Error,
            match reason {
                Some(r) => format!("Task {} failed: {}", task_id, r),
                None => format!("Task {} failed", task_id),
            },
        ),
        EventKind::Unknown { type_name, data } => {
            let text = data
                .get("message")
                .and_then(|m| m.as_str())
                .map(|m| format!("[{}] {}", type_name, m))
                .unwrap_or_else(|| format!("Unrecognised event type '{}'", type_name));
            (Info, text)
        }
        EventKind::InitiationStarted { document } => {
            (Info, format!("Submitting {}", document))
        }
        EventKind::RunInitiated { message, .. } => (
            Info,
            message.clone().unwrap_or_else(|| "Run initiated".into()),
        ),
        EventKind::InitiationFailed { reason } => {
            (Error, format!("Initiation failed: {}", reason))
        }
        EventKind::ApprovalFailed { reason } => (Error, format!("Approval failed: {}", reason)),
        EventKind::ConnectionLost { reason } => (Error, format!("Connection lost: {}", reason)),
        EventKind::RunCleared => (Info, "Run cleared".to_string()),
        EventKind::ContextFileAdded { document } => {
            (Info, format!("Added context file {}", document.name))
        }
        EventKind::ContextFileRemoved { .. } | EventKind::DeliverableRemoved { .. } => {
            return None;
        }
    };
    Some(entry)
}
