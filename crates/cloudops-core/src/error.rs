//! Failure types and the error classifier
//!
//! Every failure that leaves the remote client is a [`RawFailure`]. Callers
//! normalise it with [`classify`] into a [`ClassifiedError`], whose
//! [`ErrorKind`] is the closed taxonomy shared by all operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failure reason (no well-formed response was received)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    /// Connection could not be established
    ConnectionRefused,
    /// The exchange did not complete in time
    Timeout,
    /// A response arrived but could not be understood
    Malformed,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportFailure::ConnectionRefused => write!(f, "connection refused"),
            TransportFailure::Timeout => write!(f, "timed out"),
            TransportFailure::Malformed => write!(f, "malformed response"),
        }
    }
}

/// Unclassified failure of a single remote exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    #[error("transport error ({reason}): {message}")]
    Transport {
        reason: TransportFailure,
        message: String,
    },

    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    /// Refused locally: the target is outside the client's service
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl RawFailure {
    pub fn transport(reason: TransportFailure, message: impl Into<String>) -> Self {
        RawFailure::Transport {
            reason,
            message: message.into(),
        }
    }

    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        RawFailure::Remote {
            status,
            message: message.into(),
        }
    }

    /// Remote status code, if the remote side answered
    pub fn status(&self) -> Option<u16> {
        match self {
            RawFailure::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the same exchange may succeed
    pub fn retryable(&self) -> bool {
        match self {
            RawFailure::Transport { .. } => true,
            RawFailure::Remote { status, .. } => *status == 429 || (500..600).contains(status),
            RawFailure::Unsupported(_) => false,
        }
    }

    fn message(&self) -> &str {
        match self {
            RawFailure::Transport { message, .. } | RawFailure::Remote { message, .. } => message,
            RawFailure::Unsupported(message) => message,
        }
    }
}

/// Closed set of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Throttled,
    AuthFailure,
    Transient,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Throttled => write!(f, "throttled"),
            ErrorKind::AuthFailure => write!(f, "auth-failure"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failure normalised into the shared taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
    pub retryable: bool,
}

impl ClassifiedError {
    pub fn new(
        kind: ErrorKind,
        http_status: Option<u16>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            kind,
            http_status,
            message: message.into(),
            retryable,
        }
    }
}

impl From<RawFailure> for ClassifiedError {
    fn from(raw: RawFailure) -> Self {
        classify(&raw)
    }
}

/// Map a raw failure to its classified form.
///
/// Total and deterministic. Anything not explicitly recognised is `Unknown`
/// and not retryable.
pub fn classify(raw: &RawFailure) -> ClassifiedError {
    let message = raw.message().to_string();
    match raw {
        RawFailure::Transport { .. } => {
            ClassifiedError::new(ErrorKind::Transient, None, message, true)
        }
        RawFailure::Remote { status, .. } => {
            let status = *status;
            let (kind, retryable) = match status {
                404 => (ErrorKind::NotFound, false),
                409 => (ErrorKind::Conflict, false),
                429 => (ErrorKind::Throttled, true),
                401 | 403 => (ErrorKind::AuthFailure, false),
                500..=599 => (ErrorKind::Transient, true),
                _ => (ErrorKind::Unknown, false),
            };
            ClassifiedError::new(kind, Some(status), message, retryable)
        }
        RawFailure::Unsupported(_) => {
            ClassifiedError::new(ErrorKind::Unknown, None, message, false)
        }
    }
}

/// Failure of a state wait
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("{0}")]
    Failed(ClassifiedError),

    #[error(
        "timed out waiting for desired state (last observed: {})",
        .last_observed.as_deref().unwrap_or("none")
    )]
    Timeout { last_observed: Option<String> },

    #[error("wait cancelled")]
    Cancelled,
}

/// Failure of a page fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error(transparent)]
    Remote(RawFailure),

    #[error("page fetch cancelled")]
    Cancelled,
}

/// Failure of a call wrapped in [`with_retries`](crate::retry::with_retries)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("{0}")]
    Failed(ClassifiedError),

    #[error("call cancelled")]
    Cancelled,
}

/// Rejected wait parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidWaitSpec {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("timeout ({timeout:?}) must exceed the poll interval ({poll_interval:?})")]
    TimeoutTooShort {
        timeout: std::time::Duration,
        poll_interval: std::time::Duration,
    },

    #[error("at least one desired state is required")]
    NoDesiredStates,
}

/// Setup errors of the operation layer
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no client registered for service: {0}")]
    MissingClient(crate::model::Service),

    #[error("invalid resource reference: {0}")]
    InvalidReference(String),

    #[error("source and destination are the same object: {0}")]
    SameSourceAndDestination(String),

    #[error("invalid wait specification: {0}")]
    InvalidWait(#[from] InvalidWaitSpec),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_statuses() {
        let cases = [
            (404, ErrorKind::NotFound, false),
            (409, ErrorKind::Conflict, false),
            (429, ErrorKind::Throttled, true),
            (401, ErrorKind::AuthFailure, false),
            (403, ErrorKind::AuthFailure, false),
            (500, ErrorKind::Transient, true),
            (503, ErrorKind::Transient, true),
        ];

        for (status, kind, retryable) in cases {
            let err = classify(&RawFailure::remote(status, "boom"));
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.retryable, retryable, "status {}", status);
            assert_eq!(err.http_status, Some(status));
        }
    }

    #[test]
    fn test_unmapped_statuses_fail_closed() {
        for status in [400, 402, 405, 410, 412, 418, 302, 600] {
            let err = classify(&RawFailure::remote(status, "odd"));
            assert_eq!(err.kind, ErrorKind::Unknown, "status {}", status);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn test_transport_is_transient() {
        for reason in [
            TransportFailure::ConnectionRefused,
            TransportFailure::Timeout,
            TransportFailure::Malformed,
        ] {
            let raw = RawFailure::transport(reason, "socket");
            assert!(raw.retryable());
            let err = classify(&raw);
            assert_eq!(err.kind, ErrorKind::Transient);
            assert!(err.retryable);
            assert_eq!(err.http_status, None);
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let raw = RawFailure::remote(409, "bucket already exists");
        assert_eq!(classify(&raw), classify(&raw));
        assert_eq!(classify(&raw).message, "bucket already exists");
    }

    #[test]
    fn test_raw_retryable_agrees_with_classification() {
        for status in [200, 301, 400, 401, 403, 404, 409, 429, 500, 502, 599] {
            let raw = RawFailure::remote(status, "x");
            assert_eq!(raw.retryable(), classify(&raw).retryable, "status {}", status);
        }
    }

    #[test]
    fn test_unsupported_is_unknown() {
        let err = classify(&RawFailure::Unsupported("function on storage".into()));
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(!err.retryable);
    }
}
