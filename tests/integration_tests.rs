//! Integration tests for the dirgen CLI

mod common;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use common::{MockOrchestrator, RUN_ID, Script};
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

/// Helper to create a dirgen Command isolated from the caller's environment
fn dirgen() -> Command {
    let mut cmd = cargo_bin_cmd!("dirgen");
    cmd.env_remove("DIRGEN_HOST")
        .env_remove("DIRGEN_WS_URL")
        .env_remove("DIRGEN_LOG");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Run a blocking CLI assertion without stalling the mock server.
async fn blocking<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_dirgen_help() {
        dirgen()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("watch"))
            .stdout(predicate::str::contains("approve"));
    }

    #[test]
    fn test_dirgen_version() {
        dirgen().arg("--version").assert().success();
    }

    #[test]
    fn test_approve_requires_a_decision() {
        dirgen()
            .args(["approve", "run-1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--approve"));
    }

    #[test]
    fn test_approve_rejects_both_decisions() {
        dirgen()
            .args(["approve", "run-1", "--approve", "--reject"])
            .assert()
            .failure();
    }

    #[test]
    fn test_run_without_document_fails() {
        let dir = create_temp_project();
        dirgen()
            .current_dir(dir.path())
            .args(["run", "--host", "http://127.0.0.1:1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No document found"));
    }

    #[test]
    fn test_health_unreachable_fails() {
        let dir = create_temp_project();
        dirgen()
            .current_dir(dir.path())
            .args(["health", "--host", "http://127.0.0.1:1"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("unreachable"));
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_command {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_project();
        dirgen()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created dirgen.toml"));

        let content = fs::read_to_string(dir.path().join(".dirgen/dirgen.toml")).unwrap();
        assert!(content.contains("[orchestrator]"));
        assert!(content.contains("base_url = \"http://127.0.0.1:8000\""));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".dirgen")).unwrap();
        fs::write(dir.path().join(".dirgen/dirgen.toml"), "[client]\n").unwrap();

        dirgen()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".dirgen/dirgen.toml")).unwrap();
        assert_eq!(content, "[client]\n");
    }

    #[test]
    fn test_config_validate_defaults() {
        let dir = create_temp_project();
        dirgen()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".dirgen")).unwrap();
        fs::write(
            dir.path().join(".dirgen/dirgen.toml"),
            "[orchestrator]\nbase_url = \"ftp://example.com\"\nconnect_timeout_secs = 0\n",
        )
        .unwrap();

        dirgen()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("base_url"))
            .stdout(predicate::str::contains("connect_timeout_secs"));
    }

    #[test]
    fn test_config_show_project_file() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".dirgen")).unwrap();
        fs::write(
            dir.path().join(".dirgen/dirgen.toml"),
            "[client]\nactivity_limit = 42\n",
        )
        .unwrap();

        dirgen()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("activity_limit = 42"));
    }

    #[test]
    fn test_config_invalid_toml_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".dirgen")).unwrap();
        fs::write(dir.path().join(".dirgen/dirgen.toml"), "[client\n").unwrap();

        dirgen()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse dirgen.toml"));
    }
}

// =============================================================================
// Commands Against a Mock Orchestrator
// =============================================================================

mod against_orchestrator {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_health() {
        let server = MockOrchestrator::start(Script::ApproveAndComplete).await;
        let host = server.base.to_string();
        blocking(move || {
            dirgen()
                .args(["health", "--host", &host])
                .assert()
                .success()
                .stdout(predicate::str::contains("Orchestrator healthy"));
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop() {
        let server = MockOrchestrator::start(Script::ApproveAndComplete).await;
        let host = server.base.to_string();
        blocking(move || {
            dirgen()
                .args(["stop", RUN_ID, "--host", &host])
                .assert()
                .success()
                .stdout(predicate::str::contains("Stop requested for run-42"));
        })
        .await;
        assert_eq!(server.recorded().stops, vec![RUN_ID.to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reject_with_comment() {
        let server = MockOrchestrator::start(Script::ApproveAndComplete).await;
        let host = server.base.to_string();
        blocking(move || {
            dirgen()
                .args([
                    "approve",
                    RUN_ID,
                    "--reject",
                    "--comment",
                    "needs auth",
                    "--host",
                    &host,
                ])
                .assert()
                .success()
                .stdout(predicate::str::contains("Rejected"));
        })
        .await;
        assert_eq!(
            server.recorded().approvals,
            vec![(
                RUN_ID.to_string(),
                json!({"approved": false, "user_response": "needs auth"})
            )]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_auto_approves_to_completion() {
        let server = MockOrchestrator::start(Script::ApproveAndComplete).await;
        let host = server.base.to_string();
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".dirgen")).unwrap();
        fs::write(dir.path().join(".dirgen/svad.md"), "# Inventory service\n").unwrap();
        let project = dir.path().to_path_buf();

        blocking(move || {
            dirgen()
                .current_dir(&project)
                .args(["run", "--yes", "--host", &host])
                .timeout(std::time::Duration::from_secs(30))
                .assert()
                .success()
                .stdout(predicate::str::contains("Run completed"))
                .stdout(predicate::str::contains("src/schema.sql"));
        })
        .await;

        let recorded = server.recorded();
        assert_eq!(recorded.uploads[0].1.as_deref(), Some("svad.md"));
        assert_eq!(
            recorded.approvals,
            vec![(
                RUN_ID.to_string(),
                json!({"approved": true, "user_response": "auto-approved"})
            )]
        );
    }
}
