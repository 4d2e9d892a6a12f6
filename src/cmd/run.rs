//! Streaming commands: `dirgen run` and `dirgen watch`.

use anyhow::{Context, Result};
use futures::future::OptionFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use dirgen::activity::ActivityEntry;
use dirgen::approval::{Decision, PendingApproval, SubmitOutcome};
use dirgen::client_config::DirgenConfig;
use dirgen::connection::{ConnectionManager, WsTransport};
use dirgen::protocol::EventKind;
use dirgen::run::RunStatus;
use dirgen::session::Session;
use dirgen::ui::EventRenderer;

use super::orchestrator;

/// How approval requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalMode {
    Prompt,
    AutoApprove,
    /// Decisions are left to someone else (`dirgen approve`).
    Observe,
}

type PromptResult = Result<(Decision, Option<String>), dialoguer::Error>;

fn build_session(config: &DirgenConfig) -> Result<Session> {
    let api = Arc::new(orchestrator(config)?);
    let transport = Arc::new(WsTransport::new(config.connect_timeout()));
    let connection = ConnectionManager::new(transport, config.ws_url()?);
    Ok(Session::new(api, connection, config.activity_limit()))
}

pub async fn cmd_run(config: &DirgenConfig, document: Option<PathBuf>) -> Result<()> {
    let path = match document {
        Some(path) => path,
        None => config.find_document()?,
    };
    let mut session = build_session(config)?;
    let renderer = EventRenderer::new(config.verbose);
    renderer.note(&format!("Submitting {}", path.display()));

    let initiated = session.initiate(&path).await;
    let mode = if config.auto_approve() {
        ApprovalMode::AutoApprove
    } else {
        ApprovalMode::Prompt
    };
    follow(&mut session, &renderer, mode).await?;
    initiated.with_context(|| format!("Failed to submit {}", path.display()))?;
    conclude(&session, &renderer)
}

pub async fn cmd_watch(config: &DirgenConfig, run_id: &str) -> Result<()> {
    let mut session = build_session(config)?;
    let renderer = EventRenderer::new(config.verbose);
    session.attach(run_id).await;
    follow(&mut session, &renderer, ApprovalMode::Observe).await?;
    conclude(&session, &renderer)
}

fn conclude(session: &Session, renderer: &EventRenderer) -> Result<()> {
    renderer.finish(session.run());
    renderer.show_deliverables(session.workspace().deliverables());
    if session.run().status == RunStatus::Error {
        anyhow::bail!(
            "Run failed: {}",
            session.run().last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Pump events until the stream ends, answering approvals as they come.
///
/// Events keep being applied while a prompt is open; their entries are
/// held back and printed once the prompt closes.
async fn follow(session: &mut Session, renderer: &EventRenderer, mode: ApprovalMode) -> Result<()> {
    let mut prompt: Option<JoinHandle<PromptResult>> = None;
    let mut submission: Option<(String, JoinHandle<SubmitOutcome>)> = None;
    let mut last_seen: Option<PendingApproval> = None;
    let mut deferred: Vec<ActivityEntry> = Vec::new();
    let mut ended = false;

    loop {
        renderer.update_status(session.run(), &session.connection_status());

        if prompt.is_none()
            && submission.is_none()
            && let Some(pending) = session.pending_approval().cloned()
            && last_seen.as_ref() != Some(&pending)
        {
            renderer.show_approval(&pending);
            match mode {
                ApprovalMode::Prompt => {
                    renderer.pause();
                    let request = pending.clone();
                    prompt = Some(tokio::task::spawn_blocking(move || {
                        prompt_decision(&request)
                    }));
                }
                ApprovalMode::AutoApprove => {
                    renderer.note("Auto-approving (--yes)");
                    match session.decide(Decision::Approve, Some("auto-approved")) {
                        Ok(sub) => {
                            let run_id = sub.run_id.clone();
                            submission = Some((run_id, session.spawn_submission(sub)));
                        }
                        Err(e) => renderer.note(&format!("Decision not sent: {}", e)),
                    }
                }
                ApprovalMode::Observe => {
                    renderer.note(&format!(
                        "Waiting for a decision: dirgen approve {} --approve|--reject",
                        pending.run_id
                    ));
                }
            }
            last_seen = Some(pending);
        }

        if ended && prompt.is_none() && submission.is_none() {
            break;
        }

        tokio::select! {
            next = session.next(), if !ended => match next {
                Some(dispatched) => {
                    if let Some(entry) = dispatched.entry {
                        if prompt.is_some() {
                            deferred.push(entry);
                        } else {
                            renderer.show_entry(&entry);
                        }
                    }
                    let plan_changed = matches!(
                        dispatched.event.kind,
                        EventKind::PlanGenerated { .. } | EventKind::PlanUpdated { .. }
                    );
                    if plan_changed
                        && dispatched.verdict.is_applied()
                        && prompt.is_none()
                        && let Some(plan) = session.plan()
                    {
                        renderer.show_plan(plan);
                    }
                }
                None => ended = true,
            },
            Some(answer) = OptionFuture::from(prompt.as_mut()), if prompt.is_some() => {
                prompt = None;
                renderer.resume();
                for entry in deferred.drain(..) {
                    renderer.show_entry(&entry);
                }
                let (decision, comment) = answer
                    .context("Approval prompt panicked")?
                    .context("Failed to read approval decision")?;
                match session.decide(decision, comment.as_deref()) {
                    Ok(sub) => {
                        let run_id = sub.run_id.clone();
                        submission = Some((run_id, session.spawn_submission(sub)));
                    }
                    Err(e) => renderer.note(&format!("Decision not sent: {}", e)),
                }
            }
            Some(outcome) = OptionFuture::from(submission.as_mut().map(|(_, h)| h)), if submission.is_some() => {
                if let Some((run_id, _)) = submission.take() {
                    let outcome = outcome.context("Approval task panicked")?;
                    report_outcome(session, renderer, &run_id, outcome);
                    // A failed submission queues an event even after the stream ended.
                    ended = false;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                renderer.resume();
                renderer.note("Interrupted");
                // Runtime shutdown would wait on the blocking prompt thread.
                if let Some(code) = interrupt_exit_code(prompt.is_some()) {
                    std::process::exit(code);
                }
                break;
            }
        }
    }
    Ok(())
}

/// Exit status to leave with immediately on Ctrl-C, if the loop cannot
/// simply return.
fn interrupt_exit_code(prompt_open: bool) -> Option<i32> {
    prompt_open.then_some(130)
}

fn report_outcome(
    session: &mut Session,
    renderer: &EventRenderer,
    run_id: &str,
    outcome: SubmitOutcome,
) {
    match &outcome {
        SubmitOutcome::Sent(_) => renderer.note("Decision sent"),
        SubmitOutcome::Dropped { captured, .. } => renderer.note(&format!(
            "Decision dropped: run {} is no longer live",
            captured
        )),
        SubmitOutcome::Failed(_) => {}
    }
    session.finish_submission(run_id, &outcome);
}

fn prompt_decision(pending: &PendingApproval) -> PromptResult {
    use dialoguer::{Input, Select, theme::ColorfulTheme};

    let options = &["Approve", "Reject"];
    let phase = pending.phase.as_deref().unwrap_or("the plan");
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Decision for {}", phase))
        .items(options)
        .default(0)
        .interact()?;
    let decision = if selection == 0 {
        Decision::Approve
    } else {
        Decision::Reject
    };

    let comment: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Comment (optional)")
        .allow_empty(true)
        .interact_text()?;
    Ok((decision, Some(comment).filter(|c| !c.trim().is_empty())))
}
