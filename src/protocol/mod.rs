//! Wire protocol for the orchestrator event stream.
//!
//! Every frame is a JSON envelope:
//!
//! ```text
//! { "source": string, "type": string, "run_id": string, "timestamp": ISO8601, "data": object }
//! ```
//!
//! [`event`] holds the typed model (one [`EventKind`] variant per documented
//! `type`, plus `Unknown` for anything the server adds later) and
//! [`classify`] turns raw text frames into [`Event`]s without ever failing on
//! bad input.

pub mod classify;
pub mod event;

pub use classify::{Classifier, DiscardReason};
pub use event::{
    CLIENT_SOURCE, DocumentInfo, Event, EventKind, FileOperationKind, LogLevel, PayloadError,
    PhaseOutcome, TaskSpec,
};
