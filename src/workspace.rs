//! Workspace projection: context documents in, deliverable files out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::{DocumentInfo, Event, EventKind, FileOperationKind};

/// Which collection a viewer should be looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceView {
    #[default]
    Context,
    Deliverables,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub uploaded_by: String,
    pub added_at: DateTime<Utc>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliverableFile {
    pub id: String,
    /// Path relative to the run's workspace.
    pub path: String,
    pub size: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub content: Option<String>,
}

impl DeliverableFile {
    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Default)]
pub struct WorkspaceProjection {
    context: Vec<ContextFile>,
    deliverables: Vec<DeliverableFile>,
    view: WorkspaceView,
}

impl WorkspaceProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context_files(&self) -> &[ContextFile] {
        &self.context
    }

    pub fn deliverables(&self) -> &[DeliverableFile] {
        &self.deliverables
    }

    pub fn view(&self) -> WorkspaceView {
        self.view
    }

    pub fn add_context_file(
        &mut self,
        doc: &DocumentInfo,
        uploaded_by: &str,
        at: DateTime<Utc>,
    ) -> &ContextFile {
        self.view = WorkspaceView::Context;
        let idx = self.context.len();
        self.context.push(ContextFile {
            id: Uuid::new_v4().to_string(),
            name: doc.name.clone(),
            size: doc.size,
            uploaded_by: uploaded_by.to_string(),
            added_at: at,
            content: doc.content.clone(),
        });
        &self.context[idx]
    }

    pub fn add_deliverable(
        &mut self,
        path: &str,
        size: u64,
        created_by: &str,
        at: DateTime<Utc>,
        content: Option<String>,
    ) -> &DeliverableFile {
        self.view = WorkspaceView::Deliverables;
        let idx = self.deliverables.len();
        self.deliverables.push(DeliverableFile {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            size,
            created_by: created_by.to_string(),
            created_at: at,
            content,
        });
        &self.deliverables[idx]
    }

    pub fn remove_context_file(&mut self, id: &str) -> bool {
        let before = self.context.len();
        self.context.retain(|f| f.id != id);
        self.context.len() != before
    }

    pub fn remove_deliverable(&mut self, id: &str) -> bool {
        let before = self.deliverables.len();
        self.deliverables.retain(|f| f.id != id);
        self.deliverables.len() != before
    }

    pub fn clear(&mut self) {
        self.context.clear();
        self.deliverables.clear();
        self.view = WorkspaceView::default();
    }

    /// Apply an event the run store has already accepted.
    pub fn apply(&mut self, event: &Event) {
        match &event.kind {
            EventKind::RunInitiated { document, .. } => {
                self.clear();
                if let Some(doc) = document {
                    self.add_context_file(doc, "user", event.timestamp);
                }
            }
            EventKind::InitiationStarted { .. } | EventKind::RunCleared => self.clear(),
            EventKind::ContextFileAdded { document } => {
                self.add_context_file(document, "user", event.timestamp);
            }
            EventKind::ContextFileRemoved { file_id } => {
                if !self.remove_context_file(file_id) {
                    debug!(file_id = %file_id, "No context file to remove");
                }
            }
            EventKind::DeliverableRemoved { file_id } => {
                if !self.remove_deliverable(file_id) {
                    debug!(file_id = %file_id, "No deliverable to remove");
                }
            }
            EventKind::FileOperation {
                operation: FileOperationKind::Create,
                path,
                size,
                content,
                created_by,
            } => {
                let size = size
                    .or_else(|| content.as_ref().map(|c| c.len() as u64))
                    .unwrap_or(0);
                let creator = created_by.as_deref().unwrap_or(&event.source);
                self.add_deliverable(path, size, creator, event.timestamp, content.clone());
            }
            EventKind::Action {
                tool,
                path: Some(path),
                content_length,
                ..
            } if tool == "writeFile" => {
                self.add_deliverable(
                    path,
                    content_length.unwrap_or(0),
                    &event.source,
                    event.timestamp,
                    None,
                );
            }

            EventKind::FileOperation { .. }
            | EventKind::Action { .. }
            | EventKind::Thought { .. }
            | EventKind::PlanGenerated { .. }
            | EventKind::PlanUpdated { .. }
            | EventKind::PlanApproved { .. }
            | EventKind::PlanRejected { .. }
            | EventKind::ApprovalRequested { .. }
            | EventKind::ExecutiveSummary { .. }
            | EventKind::RetryAttempt { .. }
            | EventKind::QualityGateStart { .. }
            | EventKind::QualityGateResult { .. }
            | EventKind::PhaseStart { .. }
            | EventKind::PhaseEnd { .. }
            | EventKind::Log { .. }
            | EventKind::Info { .. }
            | EventKind::Warning { .. }
            | EventKind::AgentError { .. }
            | EventKind::RunStatusChange { .. }
            | EventKind::ExecutionStarted { .. }
            | EventKind::RunCompleted { .. }
            | EventKind::TaskStarted { .. }
            | EventKind::TaskCompleted { .. }
            | EventKind::TaskFailed { .. }
            | EventKind::Unknown { .. }
            | EventKind::InitiationFailed { .. }
            | EventKind::ApprovalFailed { .. }
            | EventKind::ConnectionLost { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> DocumentInfo {
        DocumentInfo {
            name: name.to_string(),
            size: 42,
            content: Some("# SVAD".to_string()),
        }
    }

    fn ev(kind: EventKind) -> Event {
        Event::new("r1", Utc::now(), "Coder Agent", kind)
    }

    #[test]
    fn test_add_and_remove_context_file() {
        let mut ws = WorkspaceProjection::new();
        let id = ws.add_context_file(&doc("svad.md"), "user", Utc::now()).id.clone();
        assert_eq!(ws.context_files().len(), 1);
        assert!(ws.remove_context_file(&id));
        assert!(!ws.remove_context_file(&id));
        assert!(ws.context_files().is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let mut ws = WorkspaceProjection::new();
        let a = ws.add_deliverable("a.py", 1, "x", Utc::now(), None).id.clone();
        let b = ws.add_deliverable("a.py", 1, "x", Utc::now(), None).id.clone();
        assert_ne!(a, b);
    }

    #[test]
    fn test_run_initiated_seeds_document() {
        let mut ws = WorkspaceProjection::new();
        ws.add_deliverable("old.txt", 1, "x", Utc::now(), None);
        ws.apply(&ev(EventKind::RunInitiated {
            message: None,
            document: Some(doc("svad.md")),
        }));
        assert!(ws.deliverables().is_empty());
        assert_eq!(ws.context_files()[0].name, "svad.md");
        assert_eq!(ws.context_files()[0].content.as_deref(), Some("# SVAD"));
        assert_eq!(ws.view(), WorkspaceView::Context);
    }

    #[test]
    fn test_file_operation_create_appends_deliverable() {
        let mut ws = WorkspaceProjection::new();
        ws.apply(&ev(EventKind::FileOperation {
            operation: FileOperationKind::Create,
            path: "src/main.py".into(),
            size: None,
            content: Some("print()".into()),
            created_by: None,
        }));
        let file = &ws.deliverables()[0];
        assert_eq!(file.name(), "main.py");
        assert_eq!(file.size, 7);
        assert_eq!(file.created_by, "Coder Agent");
        assert_eq!(ws.view(), WorkspaceView::Deliverables);
    }

    #[test]
    fn test_file_operation_delete_is_ignored() {
        let mut ws = WorkspaceProjection::new();
        ws.apply(&ev(EventKind::FileOperation {
            operation: FileOperationKind::Delete,
            path: "src/main.py".into(),
            size: None,
            content: None,
            created_by: None,
        }));
        assert!(ws.deliverables().is_empty());
    }

    #[test]
    fn test_write_file_action_appends_deliverable() {
        let mut ws = WorkspaceProjection::new();
        ws.apply(&ev(EventKind::Action {
            tool: "writeFile".into(),
            path: Some("README.md".into()),
            content_length: Some(100),
            args: serde_json::json!({}),
        }));
        ws.apply(&ev(EventKind::Action {
            tool: "readFile".into(),
            path: Some("README.md".into()),
            content_length: None,
            args: serde_json::json!({}),
        }));
        assert_eq!(ws.deliverables().len(), 1);
        assert_eq!(ws.deliverables()[0].size, 100);
    }

    #[test]
    fn test_deliverable_removed_event() {
        let mut ws = WorkspaceProjection::new();
        let id = ws.add_deliverable("a.py", 1, "x", Utc::now(), None).id.clone();
        ws.apply(&ev(EventKind::DeliverableRemoved { file_id: id }));
        assert!(ws.deliverables().is_empty());
    }
}
