//! Raw frame → [`Event`] classification.
//!
//! Classification never fails on bad input. Frames that are not a JSON
//! object become `log` events carrying the raw text, frames missing
//! bookkeeping fields are backfilled, and known types with broken payloads
//! are downgraded to warnings. The only frames dropped outright are empty
//! ones.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::event::{Event, EventKind, LogLevel};

const DEFAULT_SOURCE: &str = "System";

/// Why a raw frame produced no event at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Empty or whitespace-only frame (keep-alives).
    EmptyFrame,
}

/// Classifier bound to the run id of the subscription it reads from.
#[derive(Debug, Clone)]
pub struct Classifier {
    run_id: String,
}

impl Classifier {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn classify(&self, raw: &str) -> Result<Event, DiscardReason> {
        self.classify_at(raw, Utc::now())
    }

    /// Classify with an explicit wall clock, used for timestamp backfill.
    pub fn classify_at(&self, raw: &str, now: DateTime<Utc>) -> Result<Event, DiscardReason> {
        if raw.trim().is_empty() {
            return Err(DiscardReason::EmptyFrame);
        }

        let mut envelope = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => return Ok(self.raw_log(raw, now)),
        };

        let type_name = match envelope.get("type").and_then(Value::as_str) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return Ok(self.raw_log(raw, now)),
        };

        let run_id = match envelope.get("run_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => self.run_id.clone(),
        };
        let timestamp = envelope
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or(now);
        let source = envelope
            .get("source")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE)
            .to_string();
        let data = envelope
            .remove("data")
            .unwrap_or_else(|| Value::Object(Map::new()));

        let kind = match EventKind::from_wire(&type_name, data) {
            Ok(kind) => kind,
            Err(e) => {
                debug!(event_type = %type_name, error = %e, "Downgrading malformed frame");
                EventKind::Log {
                    level: LogLevel::Warn,
                    message: format!("{}: {}", e, truncate(raw, 200)),
                }
            }
        };

        Ok(Event::new(run_id, timestamp, source, kind))
    }

    fn raw_log(&self, raw: &str, now: DateTime<Utc>) -> Event {
        Event::new(
            self.run_id.clone(),
            now,
            DEFAULT_SOURCE,
            EventKind::Log {
                level: LogLevel::Info,
                message: raw.to_string(),
            },
        )
    }
}

/// RFC 3339, naive ISO 8601 (the orchestrator's `datetime.now().isoformat()`),
/// or epoch seconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let millis = (secs * 1000.0) as i64;
            DateTime::from_timestamp_millis(millis)
        }
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
