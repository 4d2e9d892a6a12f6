//! Typed error hierarchy for the DirGen client.
//!
//! One enum per subsystem:
//! - `ApiError`: outbound HTTP calls to the orchestrator
//! - `ConnectionError`: the persistent event stream transport
//! - `TransitionError`: a run status move the lattice does not allow
//! - `ApprovalError`: misuse of the approval controller

use thiserror::Error;

use crate::run::RunStatus;

/// Errors from the outbound orchestrator endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to read document at {path}: {source}")]
    DocumentRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Orchestrator returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl ApiError {
    pub(crate) fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if err.is_decode() {
            ApiError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            ApiError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Errors from the event stream transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Invalid stream URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Connection timeout after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to open event stream: {0}")]
    Open(String),

    #[error("Event stream dropped: {0}")]
    Dropped(String),
}

/// A status change the run lattice refuses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Run status cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Errors from the approval workflow controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("No approval is pending")]
    NotPending,

    #[error("Approval was requested for run {captured} but the live run is {live}")]
    StaleRun { captured: String, live: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_status_carries_code_and_body() {
        let err = ApiError::Status {
            endpoint: "/v1/initiate_from_svad".to_string(),
            status: 422,
            body: "missing svad_file".to_string(),
        };
        assert!(err.to_string().contains("422"));
        assert!(err.to_string().contains("missing svad_file"));
    }

    #[test]
    fn api_error_document_read_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/docs/svad.md");
        let err = ApiError::DocumentRead {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        match &err {
            ApiError::DocumentRead { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected DocumentRead"),
        }
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = TransitionError {
            from: RunStatus::Completed,
            to: RunStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Run status cannot move from completed to running"
        );
    }

    #[test]
    fn connection_error_variants_are_distinct() {
        let dropped = ConnectionError::Dropped("reset".into());
        let timeout = ConnectionError::Timeout { secs: 10 };
        assert!(matches!(dropped, ConnectionError::Dropped(_)));
        assert!(!matches!(timeout, ConnectionError::Dropped(_)));
        assert!(timeout.to_string().contains("10s"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ApiError::Timeout {
            endpoint: "x".into(),
        });
        assert_std_error(&ConnectionError::Open("x".into()));
        assert_std_error(&ApprovalError::NotPending);
        assert_std_error(&TransitionError {
            from: RunStatus::Idle,
            to: RunStatus::Completed,
        });
    }
}
