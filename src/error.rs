//! Error types for transaction submission.
//!
//! Four layers, from innermost to outermost:
//! - [`CancellationError`]: why an async step did not complete normally
//!   (interrupted, timed out, aborted). Only raised by the orchestrator
//!   itself, never produced by reclassifying a service error.
//! - [`ServiceError`]: domain errors returned by the external service,
//!   propagated unchanged.
//! - [`SubmitError`]: the failure of one batch item.
//! - [`BatchError`]: the batch could not proceed at all.

use crate::types::TxStatus;
use ethers::types::H256;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Tag of a [`CancellationError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CancelKind {
    Interrupted,
    TimedOut,
    Aborted,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancelKind::Interrupted => "interrupted",
            CancelKind::TimedOut => "timed out",
            CancelKind::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// An operation that was stopped before reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancellationError {
    /// Deliberately stopped mid-flight by the caller.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Did not reach a terminal state within the allotted duration.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Cancelled by an external signal or a failed dependency.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl CancellationError {
    pub fn interrupted(message: impl Into<String>) -> Self {
        CancellationError::Interrupted(message.into())
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        CancellationError::TimedOut(message.into())
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        CancellationError::Aborted(message.into())
    }

    pub fn kind(&self) -> CancelKind {
        match self {
            CancellationError::Interrupted(_) => CancelKind::Interrupted,
            CancellationError::TimedOut(_) => CancelKind::TimedOut,
            CancellationError::Aborted(_) => CancelKind::Aborted,
        }
    }

    /// The original message, without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            CancellationError::Interrupted(msg)
            | CancellationError::TimedOut(msg)
            | CancellationError::Aborted(msg) => msg,
        }
    }
}

/// Errors returned by the private execution environment service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The service cannot be reached at all.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request (bad nonce, insufficient state, ...).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Malformed call arguments or deployment parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown transaction handle or account.
    #[error("not found: {0}")]
    NotFound(String),

    /// The proof subsystem failed to prove a template.
    #[error("proof generation failed: {0}")]
    Proof(String),
}

impl ServiceError {
    /// Whether this error means no further item can make progress.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

/// A receipt that did not match what the orchestrator requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "item {index}: expected receipt {expected_status} with no error, observed {observed_status} (error: {observed_error:?}) for tx {hash:?}"
)]
pub struct InvariantViolation {
    pub index: usize,
    pub hash: H256,
    pub expected_status: TxStatus,
    pub observed_status: TxStatus,
    pub observed_error: String,
}

/// Failure of a single batch item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("receipt invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}

impl SubmitError {
    /// The cancellation kind, if this item was cancelled rather than failed.
    pub fn cancel_kind(&self) -> Option<CancelKind> {
        match self {
            SubmitError::Cancelled(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SubmitError::Service(err) if err.is_fatal())
    }
}

/// The batch could not proceed at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// A non per-item failure stopped the batch while running item `index`.
    #[error("batch aborted at item {index}: {source}")]
    Fatal { index: usize, source: ServiceError },

    /// Provisioning the batch-level sender failed.
    #[error("batch setup failed: {0}")]
    Setup(#[source] ServiceError),

    /// Stopped before any item was attempted.
    #[error("batch cancelled: {0}")]
    Cancelled(#[from] CancellationError),

    #[error("invalid batch request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type alias for a single submission.
pub type SubmitResult<T> = Result<T, SubmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_kind_and_message() {
        let err = CancellationError::timed_out("deadline of 500ms expired");
        assert_eq!(err.kind(), CancelKind::TimedOut);
        assert_eq!(err.message(), "deadline of 500ms expired");
        assert_eq!(err.to_string(), "timed out: deadline of 500ms expired");

        let err = CancellationError::interrupted("operator stop");
        assert_eq!(err.kind(), CancelKind::Interrupted);

        let err = CancellationError::aborted("node shutting down");
        assert_eq!(err.kind(), CancelKind::Aborted);
        assert_eq!(err.message(), "node shutting down");
    }

    #[test]
    fn test_domain_errors_are_not_cancellations() {
        let err: SubmitError = ServiceError::Rejected("insufficient funds".to_string()).into();
        assert_eq!(err.cancel_kind(), None);
        assert!(err.to_string().contains("insufficient funds"));

        let err: SubmitError = CancellationError::aborted("upstream failed").into();
        assert_eq!(err.cancel_kind(), Some(CancelKind::Aborted));
    }

    #[test]
    fn test_only_unavailable_is_fatal() {
        assert!(ServiceError::Unavailable("connection refused".into()).is_fatal());
        assert!(!ServiceError::Rejected("bad nonce".into()).is_fatal());
        assert!(!ServiceError::Proof("witness".into()).is_fatal());

        let err: SubmitError = ServiceError::Unavailable("down".into()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invariant_violation_display() {
        let violation = InvariantViolation {
            index: 2,
            hash: H256::zero(),
            expected_status: TxStatus::Pending,
            observed_status: TxStatus::Dropped,
            observed_error: "bad nonce".to_string(),
        };
        let msg = SubmitError::from(violation).to_string();
        assert!(msg.contains("item 2"));
        assert!(msg.contains("bad nonce"));
        assert!(msg.contains("dropped"));
    }
}
