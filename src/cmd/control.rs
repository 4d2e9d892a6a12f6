//! One-shot orchestrator calls: `dirgen approve`, `dirgen stop` and `dirgen health`.

use anyhow::{Context, Result};
use console::style;

use dirgen::api::OrchestratorApi;
use dirgen::approval::Decision;
use dirgen::client_config::DirgenConfig;
use dirgen::ui::icons::{CHECK, CROSS};

use super::orchestrator;

pub async fn cmd_approve(
    config: &DirgenConfig,
    run_id: &str,
    approve: bool,
    comment: Option<&str>,
) -> Result<()> {
    let api = orchestrator(config)?;
    let decision = if approve {
        Decision::Approve
    } else {
        Decision::Reject
    };
    let request = decision.request(comment);
    let response = api
        .approve(run_id, &request)
        .await
        .with_context(|| format!("Failed to submit decision for run {}", run_id))?;

    let verb = if request.approved {
        style("Approved").green().bold()
    } else {
        style("Rejected").yellow().bold()
    };
    println!("{}{} run {}", CHECK, verb, style(run_id).cyan());
    if let Some(message) = response.message.filter(|m| !m.is_empty()) {
        println!("  {}", message);
    }
    Ok(())
}

pub async fn cmd_stop(config: &DirgenConfig, run_id: &str) -> Result<()> {
    let api = orchestrator(config)?;
    let response = api
        .stop(run_id)
        .await
        .with_context(|| format!("Failed to stop run {}", run_id))?;
    println!(
        "{}{}",
        CHECK,
        response
            .message
            .unwrap_or_else(|| format!("Stop requested for run {}", run_id))
    );
    Ok(())
}

pub async fn cmd_health(config: &DirgenConfig) -> Result<()> {
    let api = orchestrator(config)?;
    let base = api.base().clone();
    match api.health().await {
        Ok(health) if health.status.eq_ignore_ascii_case("healthy") => {
            println!(
                "{}{} at {}",
                CHECK,
                style("Orchestrator healthy").green(),
                base
            );
            if let Some(message) = health.message {
                println!("  {}", message);
            }
            Ok(())
        }
        Ok(health) => {
            println!(
                "{}Orchestrator at {} reports '{}'",
                CROSS, base, health.status
            );
            anyhow::bail!("Orchestrator is not healthy")
        }
        Err(e) => {
            println!("{}{} at {}", CROSS, style("Orchestrator unreachable").red(), base);
            Err(e).context("Health check failed")
        }
    }
}
