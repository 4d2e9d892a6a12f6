//! One logical event loop per run.
//!
//! [`Session`] wires the connection manager, classifier, dispatcher and
//! approval controller together. Every state change, including failures of
//! the client's own calls, enters through [`Session::dispatch`], and callers
//! consume the results one at a time through [`Session::next`].

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::activity::ActivityLog;
use crate::api::{Document, OrchestratorApi, StopResponse};
use crate::approval::{
    self, ApprovalController, Decision, PendingApproval, Submission, SubmitOutcome,
};
use crate::connection::{ConnectionManager, ConnectionStatus, EventStream, StreamItem};
use crate::dispatch::{Dispatched, Dispatcher};
use crate::errors::{ApiError, ApprovalError};
use crate::plan::ExecutionPlan;
use crate::protocol::{Classifier, Event, EventKind};
use crate::run::Run;
use crate::workspace::WorkspaceProjection;

pub struct Session {
    api: Arc<dyn OrchestratorApi>,
    connection: ConnectionManager,
    dispatcher: Dispatcher,
    approvals: ApprovalController,
    live_run: watch::Sender<Option<String>>,
    stream: Option<(EventStream, Classifier)>,
    outbox: VecDeque<Dispatched>,
}

impl Session {
    pub fn new(
        api: Arc<dyn OrchestratorApi>,
        connection: ConnectionManager,
        activity_limit: usize,
    ) -> Self {
        let (live_run, _) = watch::channel(None);
        Self {
            api,
            connection,
            dispatcher: Dispatcher::new(activity_limit),
            approvals: ApprovalController::new(),
            live_run,
            stream: None,
            outbox: VecDeque::new(),
        }
    }

    pub fn run(&self) -> &Run {
        self.dispatcher.run()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.dispatcher.plan()
    }

    pub fn workspace(&self) -> &WorkspaceProjection {
        self.dispatcher.workspace()
    }

    pub fn activity(&self) -> &ActivityLog {
        self.dispatcher.activity()
    }

    pub fn pending_approval(&self) -> Option<&PendingApproval> {
        self.approvals.pending()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Apply one event and queue the result for [`Session::next`].
    pub fn dispatch(&mut self, event: Event) {
        let dispatched = self.apply(event);
        self.outbox.push_back(dispatched);
    }

    fn apply(&mut self, event: Event) -> Dispatched {
        let dispatched = self.dispatcher.dispatch(event);
        self.approvals.observe(&dispatched, self.dispatcher.run());

        let live = self.dispatcher.run().id.clone();
        self.live_run.send_if_modified(|current| {
            if *current != live {
                *current = live.clone();
                true
            } else {
                false
            }
        });

        let run = self.dispatcher.run();
        if self.stream.is_some() && (run.status.is_terminal() || run.id.is_none()) {
            debug!(status = %run.status, "Run finished or cleared, closing stream");
            self.close_stream();
        }
        dispatched
    }

    /// Submit `path` and start streaming the new run's events.
    pub async fn initiate(&mut self, path: &Path) -> Result<String, ApiError> {
        self.close_stream();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.dispatch(Event::local(None, EventKind::InitiationStarted { document: name }));

        let result = match Document::read(path) {
            Ok(document) => self
                .api
                .initiate(&document)
                .await
                .map(|response| (document, response)),
            Err(e) => Err(e),
        };
        let (document, response) = match result {
            Ok(ok) => ok,
            Err(e) => {
                self.dispatch(Event::local(
                    None,
                    EventKind::InitiationFailed {
                        reason: e.to_string(),
                    },
                ));
                return Err(e);
            }
        };

        info!(run_id = %response.run_id, "Run initiated");
        self.dispatch(Event::local(
            Some(&response.run_id),
            EventKind::RunInitiated {
                message: Some(response.message).filter(|m| !m.is_empty()),
                document: Some(document.info()),
            },
        ));
        self.open_stream(&response.run_id).await;
        Ok(response.run_id)
    }

    /// Follow an existing run without submitting anything.
    pub async fn attach(&mut self, run_id: &str) {
        self.close_stream();
        self.dispatch(Event::local(
            Some(run_id),
            EventKind::RunInitiated {
                message: Some(format!("Attached to {}", run_id)),
                document: None,
            },
        ));
        self.open_stream(run_id).await;
    }

    /// Reopen the stream for the live run after a clean close. Sealed runs
    /// stay sealed.
    pub async fn reconnect(&mut self) -> bool {
        let Some(run_id) = self.dispatcher.run().id.clone() else {
            return false;
        };
        if self.dispatcher.store().is_sealed() {
            return false;
        }
        self.open_stream(&run_id).await;
        self.stream.is_some()
    }

    async fn open_stream(&mut self, run_id: &str) {
        match self.connection.connect(run_id).await {
            Ok(stream) => self.stream = Some((stream, Classifier::new(run_id))),
            Err(e) => self.dispatch(Event::local(
                Some(run_id),
                EventKind::ConnectionLost {
                    reason: e.to_string(),
                },
            )),
        }
    }

    fn close_stream(&mut self) {
        self.stream = None;
        self.connection.disconnect();
    }

    /// Drop the live run, its stream, and any in-flight approval.
    pub fn clear(&mut self) {
        self.close_stream();
        self.dispatch(Event::local(None, EventKind::RunCleared));
    }

    /// Next dispatched event, or `None` once the stream has finished and
    /// nothing is queued.
    pub async fn next(&mut self) -> Option<Dispatched> {
        loop {
            if let Some(d) = self.outbox.pop_front() {
                return Some(d);
            }
            let (stream, classifier) = self.stream.as_mut()?;
            let item = stream.next().await;
            let run_id = classifier.run_id().to_string();
            match item {
                Some(StreamItem::Frame(raw)) => match classifier.classify(&raw) {
                    Ok(event) => return Some(self.apply(event)),
                    Err(reason) => debug!(?reason, "Frame discarded"),
                },
                Some(StreamItem::Closed) => {
                    info!(run_id = %run_id, "Stream closed by server");
                    self.close_stream();
                }
                Some(StreamItem::Failed(e)) => {
                    self.close_stream();
                    return Some(self.apply(Event::local(
                        Some(&run_id),
                        EventKind::ConnectionLost {
                            reason: e.to_string(),
                        },
                    )));
                }
                None => self.close_stream(),
            }
        }
    }

    /// Bind a decision to the pending approval.
    pub fn decide(
        &mut self,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<Submission, ApprovalError> {
        let live = self.dispatcher.run().id.clone();
        self.approvals.decide(decision, comment, live.as_deref())
    }

    /// Send a submission in the background so events keep flowing meanwhile.
    /// The task drops the request if the live run changes first.
    pub fn spawn_submission(&self, submission: Submission) -> JoinHandle<SubmitOutcome> {
        let api = Arc::clone(&self.api);
        let live = self.live_run.subscribe();
        tokio::spawn(async move { approval::submit(api.as_ref(), submission, live).await })
    }

    /// Feed a finished submission back into the pipeline.
    pub fn finish_submission(&mut self, run_id: &str, outcome: &SubmitOutcome) {
        match outcome {
            SubmitOutcome::Sent(response) => {
                debug!(run_id, status = ?response.status, "Approval accepted");
            }
            SubmitOutcome::Dropped { .. } => {}
            SubmitOutcome::Failed(e) => self.dispatch(Event::local(
                Some(run_id),
                EventKind::ApprovalFailed {
                    reason: e.to_string(),
                },
            )),
        }
    }

    /// Decide and submit inline.
    pub async fn submit_decision(
        &mut self,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<SubmitOutcome, ApprovalError> {
        let submission = self.decide(decision, comment)?;
        let run_id = submission.run_id.clone();
        let outcome =
            approval::submit(self.api.as_ref(), submission, self.live_run.subscribe()).await;
        self.finish_submission(&run_id, &outcome);
        Ok(outcome)
    }

    /// Attach another document to the live run's context.
    pub fn add_context_file(&mut self, path: &Path) -> Result<(), ApiError> {
        let document = Document::read(path)?;
        let run_id = self.dispatcher.run().id.clone();
        self.dispatch(Event::local(
            run_id.as_deref(),
            EventKind::ContextFileAdded {
                document: document.info(),
            },
        ));
        Ok(())
    }

    pub fn remove_context_file(&mut self, file_id: &str) {
        let run_id = self.dispatcher.run().id.clone();
        self.dispatch(Event::local(
            run_id.as_deref(),
            EventKind::ContextFileRemoved {
                file_id: file_id.to_string(),
            },
        ));
    }

    pub fn remove_deliverable(&mut self, file_id: &str) {
        let run_id = self.dispatcher.run().id.clone();
        self.dispatch(Event::local(
            run_id.as_deref(),
            EventKind::DeliverableRemoved {
                file_id: file_id.to_string(),
            },
        ));
    }

    /// Ask the orchestrator to stop the live run.
    pub async fn stop(&self) -> Option<Result<StopResponse, ApiError>> {
        let run_id = self.dispatcher.run().id.as_deref()?;
        Some(self.api.stop(run_id).await)
    }
}
