//! Run state store.
//!
//! The store holds the single live [`Run`] and is mutated only through
//! [`RunStore::apply`]. Status moves follow a fixed lattice:
//!
//! ```text
//! idle → initializing → running ⇄ waiting_approval → { completed | error }
//! ```
//!
//! `idle` is reached only through an explicit clear or a plan rejection, and a
//! terminal status seals the run: later events carrying its id are discarded
//! until a new run is initiated.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::errors::TransitionError;
use crate::protocol::{Event, EventKind, PhaseOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Initializing,
    Running,
    WaitingApproval,
    Completed,
    Error,
}

impl RunStatus {
    fn rank(self) -> u8 {
        match self {
            RunStatus::Idle => 0,
            RunStatus::Initializing => 1,
            RunStatus::Running | RunStatus::WaitingApproval => 2,
            RunStatus::Completed | RunStatus::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunStatus::Initializing | RunStatus::Running | RunStatus::WaitingApproval
        )
    }

    /// Whether an event may move `self` to `to`. Moves to `idle` go through
    /// [`RunStore`]'s clear path and are never ordinary moves.
    pub fn can_move_to(self, to: RunStatus) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (_, RunStatus::Idle) => false,
            (from, _) if from.is_terminal() => false,
            (RunStatus::Running, RunStatus::WaitingApproval)
            | (RunStatus::WaitingApproval, RunStatus::Running) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Initializing => "initializing",
            RunStatus::Running => "running",
            RunStatus::WaitingApproval => "waiting_approval",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the live run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Run {
    /// Unset between `initiation_started` and `run_initiated`, and when idle.
    pub id: Option<String>,
    pub status: RunStatus,
    /// Free-form label supplied by the orchestrator.
    pub phase: Option<String>,
    pub last_error: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Why the store refused to look at an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    /// No run is live.
    NoLiveRun,
    /// The event belongs to another run.
    RunMismatch { live: String, event: String },
    /// The live run reached a terminal status.
    Sealed { run_id: String },
    /// `run_initiated` without a run id.
    MissingRunId,
}

/// What applying an accepted event did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub transition: Option<(RunStatus, RunStatus)>,
    pub rejected: Option<TransitionError>,
    /// The live run was replaced or removed; projections start over.
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Applied(Applied),
    Discarded(Discard),
}

impl Verdict {
    pub fn is_applied(&self) -> bool {
        matches!(self, Verdict::Applied(_))
    }
}

/// Single owner of the live run.
#[derive(Debug, Default)]
pub struct RunStore {
    run: Run,
    sealed: bool,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.id.as_deref()
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// The only mutation entry point.
    pub fn apply(&mut self, event: &Event) -> Verdict {
        if !event.kind.is_lifecycle()
            && let Err(discard) = self.admit(&event.run_id)
        {
            debug!(
                event_type = event.type_name(),
                event_run = %event.run_id,
                reason = ?discard,
                "Discarding event"
            );
            return Verdict::Discarded(discard);
        }

        let mut applied = Applied::default();
        match &event.kind {
            // ── lifecycle ──
            EventKind::InitiationStarted { document } => {
                info!(document = %document, "Run initiation started");
                self.reset(None, &mut applied);
                self.set_status(RunStatus::Initializing, &mut applied);
            }
            EventKind::RunInitiated { message, document } => {
                if event.run_id.is_empty() {
                    return Verdict::Discarded(Discard::MissingRunId);
                }
                info!(run_id = %event.run_id, "Run initiated");
                let from = self.run.status;
                self.reset(Some(event.run_id.clone()), &mut applied);
                self.run.status = RunStatus::Initializing;
                if from != RunStatus::Initializing {
                    applied.transition = Some((from, RunStatus::Initializing));
                }
                self.run.started_at = Some(event.timestamp);
                if let Some(message) = message {
                    self.set_meta("initiation_message", json!(message));
                }
                if let Some(doc) = document {
                    self.set_meta("document", json!(doc.name));
                }
            }
            EventKind::InitiationFailed { reason } => {
                warn!(reason = %reason, "Run initiation failed");
                self.fail(reason.clone(), &mut applied);
            }
            EventKind::RunCleared => {
                info!("Run cleared");
                let from = self.run.status;
                self.reset(None, &mut applied);
                if from != RunStatus::Idle {
                    applied.transition = Some((from, RunStatus::Idle));
                }
            }

            // ── workflow ──
            EventKind::PlanGenerated { .. } | EventKind::ApprovalRequested { .. } => {
                if let EventKind::ApprovalRequested {
                    phase_requested: Some(phase),
                    ..
                } = &event.kind
                {
                    self.run.phase = Some(phase.clone());
                }
                self.set_status(RunStatus::WaitingApproval, &mut applied);
            }
            EventKind::PlanApproved { .. } | EventKind::ExecutionStarted { .. } => {
                self.set_status(RunStatus::Running, &mut applied);
            }
            EventKind::PlanRejected { message, .. } => {
                info!(
                    run_id = ?self.run.id,
                    reason = message.as_deref().unwrap_or_default(),
                    "Plan rejected, clearing run"
                );
                let from = self.run.status;
                self.run.id = None;
                self.run.status = RunStatus::Idle;
                self.sealed = false;
                if from != RunStatus::Idle {
                    applied.transition = Some((from, RunStatus::Idle));
                }
            }
            EventKind::PhaseStart { name } => {
                self.run.phase = Some(name.clone());
                if self.run.status == RunStatus::Initializing {
                    self.set_status(RunStatus::Running, &mut applied);
                }
            }
            EventKind::PhaseEnd {
                name,
                outcome,
                reason,
            } => match outcome {
                PhaseOutcome::Approved => self.set_status(RunStatus::Running, &mut applied),
                PhaseOutcome::Rejected | PhaseOutcome::Failed => {
                    let phase = name
                        .clone()
                        .or_else(|| self.run.phase.clone())
                        .unwrap_or_else(|| "phase".to_string());
                    let verb = if *outcome == PhaseOutcome::Rejected {
                        "rejected"
                    } else {
                        "failed"
                    };
                    let message = match reason {
                        Some(reason) if !reason.is_empty() => {
                            format!("{} {}: {}", phase, verb, reason)
                        }
                        _ => format!("{} {}", phase, verb),
                    };
                    self.fail(message, &mut applied);
                }
                PhaseOutcome::Other(status) => {
                    debug!(status = %status, "Unrecognised phase_end status");
                }
            },
            EventKind::RunStatusChange { phase, .. } => {
                if let Some(phase) = phase {
                    self.run.phase = Some(phase.clone());
                }
            }
            EventKind::RunCompleted { .. } => {
                self.set_status(RunStatus::Completed, &mut applied);
            }
            EventKind::RetryAttempt {
                attempt,
                max_attempts,
                feedback,
            } => {
                self.set_meta(
                    "retry_attempt",
                    json!({"attempt": attempt, "max_attempts": max_attempts, "feedback": feedback}),
                );
            }
            EventKind::QualityGateStart { name } => {
                self.set_meta("quality_gate", json!({"name": name, "state": "running"}));
            }
            EventKind::QualityGateResult { success, message } => {
                let state = if *success { "passed" } else { "failed" };
                self.set_meta("quality_gate", json!({"state": state, "message": message}));
            }
            EventKind::ExecutiveSummary {
                summary,
                agent_role,
            } => {
                let role = agent_role.as_deref().unwrap_or("orchestrator");
                self.set_meta(&format!("summary.{}", role), json!(summary));
            }

            // ── failures raised by this client ──
            EventKind::ApprovalFailed { reason } => {
                warn!(reason = %reason, "Approval submission failed");
                self.fail(reason.clone(), &mut applied);
            }
            EventKind::ConnectionLost { reason } => {
                warn!(reason = %reason, "Event stream lost");
                self.fail(reason.clone(), &mut applied);
            }

            // ── no run-level effect ──
            EventKind::Thought { .. }
            | EventKind::PlanUpdated { .. }
            | EventKind::Action { .. }
            | EventKind::FileOperation { .. }
            | EventKind::Log { .. }
            | EventKind::Info { .. }
            | EventKind::Warning { .. }
            | EventKind::AgentError { .. }
            | EventKind::TaskStarted { .. }
            | EventKind::TaskCompleted { .. }
            | EventKind::TaskFailed { .. }
            | EventKind::ContextFileAdded { .. }
            | EventKind::ContextFileRemoved { .. }
            | EventKind::DeliverableRemoved { .. } => {}
            EventKind::Unknown { type_name, .. } => {
                debug!(event_type = %type_name, "No run effect for unrecognised event type");
            }
        }

        if self.run.status.is_terminal() && self.run.id.is_some() && !self.sealed {
            self.sealed = true;
            info!(run_id = ?self.run.id, status = %self.run.status, "Run sealed");
        }

        Verdict::Applied(applied)
    }

    fn admit(&self, event_run_id: &str) -> Result<(), Discard> {
        let live = self.run.id.as_deref().ok_or(Discard::NoLiveRun)?;
        if event_run_id != live {
            return Err(Discard::RunMismatch {
                live: live.to_string(),
                event: event_run_id.to_string(),
            });
        }
        if self.sealed {
            return Err(Discard::Sealed {
                run_id: live.to_string(),
            });
        }
        Ok(())
    }

    fn reset(&mut self, id: Option<String>, applied: &mut Applied) {
        self.run = Run {
            id,
            ..Run::default()
        };
        self.sealed = false;
        applied.reset = true;
    }

    fn set_status(&mut self, to: RunStatus, applied: &mut Applied) {
        let from = self.run.status;
        if from == to {
            return;
        }
        if from.can_move_to(to) {
            self.run.status = to;
            applied.transition = Some((from, to));
        } else {
            let err = TransitionError { from, to };
            warn!(run_id = ?self.run.id, "{}", err);
            applied.rejected = Some(err);
        }
    }

    fn fail(&mut self, message: String, applied: &mut Applied) {
        self.set_status(RunStatus::Error, applied);
        if applied.rejected.is_none() {
            self.run.last_error = Some(message);
        }
    }

    fn set_meta(&mut self, key: &str, value: Value) {
        self.run.metadata.insert(key.to_string(), value);
    }
}
