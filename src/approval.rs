//! Approval workflow controller.
//!
//! An approval becomes pending when an approval-request event is applied while
//! the run waits for a decision. The run id is captured at that moment, and a
//! decision is only ever sent for that run: if the live run changes before or
//! while the submission is in flight, the submission is dropped.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{ApprovalRequest, ApprovalResponse, OrchestratorApi};
use crate::dispatch::Dispatched;
use crate::errors::{ApiError, ApprovalError};
use crate::protocol::EventKind;
use crate::run::{Run, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn approved(self) -> bool {
        self == Decision::Approve
    }

    /// Request body for this decision. A blank comment falls back to
    /// "approved" or "rejected".
    pub fn request(self, comment: Option<&str>) -> ApprovalRequest {
        let user_response = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match self {
                Decision::Approve => "approved".to_string(),
                Decision::Reject => "rejected".to_string(),
            });
        ApprovalRequest {
            approved: self.approved(),
            user_response,
        }
    }
}

/// A decision the user still owes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    pub run_id: String,
    pub phase: Option<String>,
    pub prompt: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// A decision bound to the run it was requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub run_id: String,
    pub request: ApprovalRequest,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Sent(ApprovalResponse),
    /// The live run changed; nothing was applied for the captured run.
    Dropped { captured: String, live: Option<String> },
    Failed(ApiError),
}

#[derive(Debug, Default)]
pub struct ApprovalController {
    pending: Option<PendingApproval>,
}

impl ApprovalController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingApproval> {
        self.pending.as_ref()
    }

    /// Update after each dispatch. Returns the approval if one was just
    /// captured.
    pub fn observe(&mut self, dispatched: &Dispatched, run: &Run) -> Option<&PendingApproval> {
        if run.status != RunStatus::WaitingApproval {
            self.pending = None;
            return None;
        }
        if !dispatched.applied() {
            return None;
        }
        let prompt = match &dispatched.event.kind {
            EventKind::PlanGenerated { message, .. } => message.clone(),
            EventKind::ApprovalRequested { message, .. } => message.clone(),
            _ => return None,
        };
        let run_id = run.id.clone()?;
        info!(run_id = %run_id, phase = ?run.phase, "Approval requested");
        self.pending = Some(PendingApproval {
            run_id,
            phase: run.phase.clone(),
            prompt,
            requested_at: dispatched.event.timestamp,
        });
        self.pending.as_ref()
    }

    /// Bind a decision to the captured run. Clears the pending approval.
    pub fn decide(
        &mut self,
        decision: Decision,
        comment: Option<&str>,
        live_run_id: Option<&str>,
    ) -> Result<Submission, ApprovalError> {
        let pending = self.pending.as_ref().ok_or(ApprovalError::NotPending)?;
        if live_run_id != Some(pending.run_id.as_str()) {
            let err = ApprovalError::StaleRun {
                captured: pending.run_id.clone(),
                live: live_run_id.unwrap_or("none").to_string(),
            };
            self.pending = None;
            return Err(err);
        }
        let pending = self.pending.take().ok_or(ApprovalError::NotPending)?;
        Ok(Submission {
            run_id: pending.run_id,
            request: decision.request(comment),
        })
    }
}

/// Send `submission`, racing it against changes of the live run id.
pub async fn submit(
    api: &dyn OrchestratorApi,
    submission: Submission,
    mut live_run: watch::Receiver<Option<String>>,
) -> SubmitOutcome {
    let captured = submission.run_id.clone();
    let is_stale = |live: &Option<String>| live.as_deref() != Some(captured.as_str());

    if is_stale(&*live_run.borrow()) {
        let live = live_run.borrow().clone();
        warn!(captured = %captured, live = ?live, "Dropping approval for superseded run");
        return SubmitOutcome::Dropped { captured, live };
    }

    tokio::select! {
        result = api.approve(&submission.run_id, &submission.request) => match result {
            Ok(response) => SubmitOutcome::Sent(response),
            Err(e) => {
                warn!(run_id = %captured, error = %e, "Approval submission failed");
                SubmitOutcome::Failed(e)
            }
        },
        changed = live_run.wait_for(|live| is_stale(live)) => {
            let live = changed.map(|v| v.clone()).unwrap_or(None);
            warn!(captured = %captured, live = ?live, "Live run changed, abandoning approval");
            SubmitOutcome::Dropped { captured: submission.run_id.clone(), live }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Document, HealthResponse, InitiateResponse, StopResponse};
    use crate::dispatch::Dispatcher;
    use crate::protocol::{Event, TaskSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeApi {
        delay: Duration,
        fail: bool,
        sent: Mutex<Vec<(String, ApprovalRequest)>>,
    }

    impl FakeApi {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail: false,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OrchestratorApi for FakeApi {
        async fn initiate(&self, _: &Document) -> Result<InitiateResponse, ApiError> {
            unreachable!()
        }

        async fn approve(
            &self,
            run_id: &str,
            request: &ApprovalRequest,
        ) -> Result<ApprovalResponse, ApiError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ApiError::Status {
                    endpoint: "approve".into(),
                    status: 400,
                    body: "not waiting".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((run_id.to_string(), request.clone()));
            Ok(ApprovalResponse::default())
        }

        async fn stop(&self, _: &str) -> Result<StopResponse, ApiError> {
            unreachable!()
        }

        async fn health(&self) -> Result<HealthResponse, ApiError> {
            unreachable!()
        }
    }

    fn waiting(run_id: &str) -> (Dispatcher, ApprovalController) {
        let mut d = Dispatcher::default();
        let mut c = ApprovalController::new();
        for event in [
            Event::local(
                Some(run_id),
                EventKind::RunInitiated {
                    message: None,
                    document: None,
                },
            ),
            Event::new(
                run_id,
                Utc::now(),
                "Planner",
                EventKind::PlanGenerated {
                    plan_id: None,
                    message: Some("Approve the plan?".into()),
                    tasks: vec![TaskSpec {
                        id: "task-1".into(),
                        title: "x".into(),
                        description: None,
                        status: None,
                        order: 0,
                        expected_artifacts: vec![],
                        assigned_to: None,
                    }],
                },
            ),
        ] {
            let out = d.dispatch(event);
            c.observe(&out, d.run());
        }
        (d, c)
    }

    #[test]
    fn test_captures_run_id_on_request() {
        let (_, c) = waiting("r1");
        let pending = c.pending().unwrap();
        assert_eq!(pending.run_id, "r1");
        assert_eq!(pending.prompt.as_deref(), Some("Approve the plan?"));
    }

    #[test]
    fn test_inactive_outside_waiting_approval() {
        let (mut d, mut c) = waiting("r1");
        let out = d.dispatch(Event::new(
            "r1",
            Utc::now(),
            "o",
            EventKind::ExecutionStarted { message: None },
        ));
        c.observe(&out, d.run());
        assert!(c.pending().is_none());
        assert_eq!(
            c.decide(Decision::Approve, None, Some("r1")),
            Err(ApprovalError::NotPending)
        );
    }

    #[test]
    fn test_decide_builds_request() {
        let (_, mut c) = waiting("r1");
        let submission = c
            .decide(Decision::Reject, Some("  needs auth  "), Some("r1"))
            .unwrap();
        assert_eq!(submission.run_id, "r1");
        assert!(!submission.request.approved);
        assert_eq!(submission.request.user_response, "needs auth");
        assert!(c.pending().is_none());
    }

    #[test]
    fn test_decide_without_comment_uses_default() {
        let (_, mut c) = waiting("r1");
        let submission = c.decide(Decision::Approve, Some(""), Some("r1")).unwrap();
        assert!(submission.request.approved);
        assert_eq!(submission.request.user_response, "approved");
    }

    #[test]
    fn test_cleared_run_between_request_and_decision() {
        let (mut d, mut c) = waiting("r1");
        let out = d.dispatch(Event::local(None, EventKind::RunCleared));
        c.observe(&out, d.run());
        assert_eq!(
            c.decide(Decision::Approve, None, d.store().run_id()),
            Err(ApprovalError::NotPending)
        );
    }

    #[test]
    fn test_decide_against_new_run_is_stale() {
        let (_, mut c) = waiting("r1");
        let err = c.decide(Decision::Approve, None, Some("r2")).unwrap_err();
        assert_eq!(
            err,
            ApprovalError::StaleRun {
                captured: "r1".into(),
                live: "r2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_sends_for_live_run() {
        let api = FakeApi::new(Duration::ZERO);
        let (_tx, rx) = watch::channel(Some("r1".to_string()));
        let outcome = submit(
            &api,
            Submission {
                run_id: "r1".into(),
                request: ApprovalRequest {
                    approved: true,
                    user_response: "ok".into(),
                },
            },
            rx,
        )
        .await;
        assert!(matches!(outcome, SubmitOutcome::Sent(_)));
        assert_eq!(api.sent.lock().unwrap()[0].0, "r1");
    }

    #[tokio::test]
    async fn test_submit_dropped_when_run_already_changed() {
        let api = FakeApi::new(Duration::ZERO);
        let (_tx, rx) = watch::channel(None);
        let outcome = submit(
            &api,
            Submission {
                run_id: "r1".into(),
                request: ApprovalRequest {
                    approved: true,
                    user_response: "ok".into(),
                },
            },
            rx,
        )
        .await;
        assert!(matches!(outcome, SubmitOutcome::Dropped { live: None, .. }));
        assert!(api.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_abandoned_when_run_changes_in_flight() {
        let api = FakeApi::new(Duration::from_secs(5));
        let (tx, rx) = watch::channel(Some("r1".to_string()));
        let handle = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(Some("r2".to_string()));
        };
        let (outcome, _) = tokio::join!(
            submit(
                &api,
                Submission {
                    run_id: "r1".into(),
                    request: ApprovalRequest {
                        approved: true,
                        user_response: "ok".into(),
                    },
                },
                rx,
            ),
            handle
        );
        match outcome {
            SubmitOutcome::Dropped { captured, live } => {
                assert_eq!(captured, "r1");
                assert_eq!(live.as_deref(), Some("r2"));
            }
            other => panic!("Expected Dropped, got {:?}", other),
        }
        assert!(api.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_is_reported() {
        let mut api = FakeApi::new(Duration::ZERO);
        api.fail = true;
        let (_tx, rx) = watch::channel(Some("r1".to_string()));
        let outcome = submit(
            &api,
            Submission {
                run_id: "r1".into(),
                request: ApprovalRequest {
                    approved: false,
                    user_response: "no".into(),
                },
            },
            rx,
        )
        .await;
        assert!(matches!(
            outcome,
            SubmitOutcome::Failed(ApiError::Status { status: 400, .. })
        ));
    }
}
