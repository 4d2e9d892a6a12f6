//! Sequential event dispatch.
//!
//! Every classified event passes through [`Dispatcher::dispatch`] one at a
//! time. The run store decides whether the event belongs to the live run; only
//! accepted events reach the plan, workspace and activity projections, so all
//! three views are folds over the same ordered sequence.

use crate::activity::{ActivityEntry, ActivityLog};
use crate::plan::{ExecutionPlan, PlanProjection};
use crate::protocol::Event;
use crate::run::{Run, RunStore, Verdict};
use crate::workspace::WorkspaceProjection;

/// Outcome of dispatching one event.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub event: Event,
    pub verdict: Verdict,
    /// Activity entry written for the event, if any.
    pub entry: Option<ActivityEntry>,
}

impl Dispatched {
    pub fn applied(&self) -> bool {
        self.verdict.is_applied()
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    store: RunStore,
    plan: PlanProjection,
    workspace: WorkspaceProjection,
    activity: ActivityLog,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(crate::activity::DEFAULT_ACTIVITY_LIMIT)
    }
}

impl Dispatcher {
    pub fn new(activity_limit: usize) -> Self {
        Self {
            store: RunStore::new(),
            plan: PlanProjection::new(),
            workspace: WorkspaceProjection::new(),
            activity: ActivityLog::new(activity_limit),
        }
    }

    pub fn dispatch(&mut self, event: Event) -> Dispatched {
        let verdict = self.store.apply(&event);
        let entry = if verdict.is_applied() {
            self.plan.apply(&event);
            self.workspace.apply(&event);
            self.activity.record(&event).cloned()
        } else {
            None
        };
        Dispatched {
            event,
            verdict,
            entry,
        }
    }

    /// Apply in arrival order; a later event overrides an earlier one.
    pub fn dispatch_batch(&mut self, events: impl IntoIterator<Item = Event>) -> Vec<Dispatched> {
        events.into_iter().map(|e| self.dispatch(e)).collect()
    }

    pub fn run(&self) -> &Run {
        self.store.run()
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.plan()
    }

    pub fn workspace(&self) -> &WorkspaceProjection {
        &self.workspace
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TaskStatus;
    use crate::protocol::{Classifier, DocumentInfo, EventKind, FileOperationKind};
    use crate::run::{Discard, RunStatus};
    use chrono::Utc;

    fn initiated(run_id: &str) -> Dispatcher {
        let mut d = Dispatcher::default();
        d.dispatch(Event::local(
            None,
            EventKind::InitiationStarted {
                document: "svad.md".into(),
            },
        ));
        d.dispatch(Event::local(
            Some(run_id),
            EventKind::RunInitiated {
                message: Some("Run started".into()),
                document: Some(DocumentInfo {
                    name: "svad.md".into(),
                    size: 12,
                    content: None,
                }),
            },
        ));
        d
    }

    fn frame(d: &mut Dispatcher, raw: &str) -> Dispatched {
        let classifier = Classifier::new(d.run().id.clone().unwrap_or_default());
        let event = classifier.classify(raw).unwrap();
        d.dispatch(event)
    }

    #[test]
    fn test_plan_generated_scenario() {
        let mut d = initiated("r1");
        frame(
            &mut d,
            r#"{"type":"plan_generated","run_id":"r1","source":"Planner Agent","data":{"plan":["a","b","c"]}}"#,
        );
        assert_eq!(d.run().status, RunStatus::WaitingApproval);
        let plan = d.plan().unwrap();
        assert_eq!(plan.tasks.len(), 3);
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn test_unknown_type_logs_without_status_change() {
        let mut d = initiated("r1");
        frame(&mut d, r#"{"type":"execution_started","run_id":"r1"}"#);
        let out = frame(&mut d, r#"{"type":"future_event","run_id":"r1","data":{}}"#);
        assert!(out.applied());
        assert_eq!(d.run().status, RunStatus::Running);
        assert!(out.entry.unwrap().text.contains("future_event"));
    }

    #[test]
    fn test_foreign_run_touches_no_projection() {
        let mut d = initiated("r1");
        let before = d.activity().len();
        let out = frame(
            &mut d,
            r#"{"type":"file_operation","run_id":"old","data":{"operation":"create","path":"x.py"}}"#,
        );
        assert!(matches!(
            out.verdict,
            Verdict::Discarded(Discard::RunMismatch { .. })
        ));
        assert!(out.entry.is_none());
        assert!(d.workspace().deliverables().is_empty());
        assert_eq!(d.activity().len(), before);
    }

    #[test]
    fn test_batch_later_event_wins() {
        let mut d = initiated("r1");
        let now = Utc::now();
        let results = d.dispatch_batch(vec![
            Event::new("r1", now, "o", EventKind::ExecutionStarted { message: None }),
            Event::new(
                "r1",
                // Earlier timestamp, later arrival.
                now - chrono::Duration::seconds(30),
                "o",
                EventKind::ApprovalRequested {
                    message: None,
                    phase_completed: None,
                    phase_requested: None,
                },
            ),
        ]);
        assert_eq!(results.len(), 2);
        assert_eq!(d.run().status, RunStatus::WaitingApproval);
    }

    #[test]
    fn test_run_initiated_replaces_projections() {
        let mut d = initiated("r1");
        d.dispatch(Event::new(
            "r1",
            Utc::now(),
            "Coder",
            EventKind::FileOperation {
                operation: FileOperationKind::Create,
                path: "a.py".into(),
                size: Some(1),
                content: None,
                created_by: None,
            },
        ));
        assert_eq!(d.workspace().deliverables().len(), 1);

        d.dispatch(Event::local(
            Some("r2"),
            EventKind::RunInitiated {
                message: None,
                document: None,
            },
        ));
        assert!(d.workspace().deliverables().is_empty());
        assert!(d.plan().is_none());
        assert_eq!(d.run().id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_unclean_close_then_ignored() {
        let mut d = initiated("r1");
        frame(&mut d, r#"{"type":"execution_started","run_id":"r1"}"#);
        d.dispatch(Event::local(
            Some("r1"),
            EventKind::ConnectionLost {
                reason: "reset by peer".into(),
            },
        ));
        assert_eq!(d.run().status, RunStatus::Error);
        let out = frame(&mut d, r#"{"type":"run_completed","run_id":"r1"}"#);
        assert!(!out.applied());
        assert_eq!(d.run().status, RunStatus::Error);
    }
}
