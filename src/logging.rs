//! Tracing setup for the `dirgen` binary.
//!
//! Human-readable output goes to stderr so stdout stays free for command
//! output. When file logging is enabled, a daily-rotated log is also written
//! under `.dirgen/logs/`, as plain text or as JSON lines.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::client_config::ENV_LOG;

pub const LOG_FILE_PREFIX: &str = "dirgen.log";

/// `DIRGEN_LOG` if set and valid, else `fallback`, else `info`.
pub fn build_filter(env_value: Option<&str>, fallback: &str) -> EnvFilter {
    env_value
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_new(fallback).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. Calling this twice is harmless; the second call
/// leaves the first subscriber in place.
pub fn init_logging(level: &str, log_dir: Option<&Path>, json: bool) -> Option<WorkerGuard> {
    let env_value = std::env::var(ENV_LOG).ok();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (writer, guard) = match log_dir.and_then(file_writer) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    let (text_writer, json_writer) = if json {
        (None, writer)
    } else {
        (writer, None)
    };
    let text_layer = text_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
    });
    let json_layer = json_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
    });

    let result = tracing_subscriber::registry()
        .with(build_filter(env_value.as_deref(), level))
        .with(stderr_layer)
        .with(text_layer)
        .with(json_layer)
        .try_init();

    if result.is_ok() {
        tracing::debug!(
            level,
            json,
            log_dir = ?log_dir.map(|d| d.display().to_string()),
            "tracing initialized"
        );
    }
    guard
}

fn file_writer(
    log_dir: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "failed to create log directory '{}': {}",
            log_dir.display(),
            err
        );
        return None;
    }
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_filter_prefers_env() {
        let filter = build_filter(Some("dirgen=trace"), "warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_filter_falls_back_on_empty_env() {
        let filter = build_filter(Some("  "), "warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_json_file_layer_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging("info", Some(dir.path()), true).unwrap();
        tracing::info!(run_id = "r1", "json check");
        drop(guard);

        let file = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
            })
            .unwrap();
        let content = std::fs::read_to_string(file).unwrap();
        let line = content
            .lines()
            .find(|l| l.contains("json check"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "json check");
        assert_eq!(value["fields"]["run_id"], "r1");
    }

    #[test]
    fn test_filter_falls_back_on_missing_env() {
        let filter = build_filter(None, "debug");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
