//! Engine error types and the retryability taxonomy.

use ferry_protocol::RemoteError;

/// Classification of a remote failure, driving the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection-level failure. Retryable.
    TransientNetwork,
    /// The call timed out. Retryable.
    Timeout,
    /// Remote 5xx. Retryable.
    ServerError,
    /// Remote 429. Retryable with longer backoff.
    RateLimited,
    /// Remote 409 from concurrent chunk writes racing. Retryable with a
    /// short jittered delay since these resolve quickly.
    OrderingConflict,
    /// Any other 4xx (bad request, auth, validation). Fatal; fails the
    /// chunk and, by propagation, the session.
    Validation,
}

impl ErrorClass {
    /// Classifies a remote call failure.
    pub fn of(err: &RemoteError) -> Self {
        match err {
            RemoteError::Network(_) => ErrorClass::TransientNetwork,
            RemoteError::Timeout => ErrorClass::Timeout,
            RemoteError::Status { code, .. } => match code {
                409 => ErrorClass::OrderingConflict,
                429 => ErrorClass::RateLimited,
                500..=599 => ErrorClass::ServerError,
                _ => ErrorClass::Validation,
            },
        }
    }

    /// Returns `true` if failures of this class may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Validation)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::TransientNetwork => "transient_network",
            ErrorClass::Timeout => "timeout",
            ErrorClass::ServerError => "server_error",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::OrderingConflict => "ordering_conflict",
            ErrorClass::Validation => "validation",
        };
        write!(f, "{name}")
    }
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("remote call failed ({class}): {source}")]
    Remote {
        class: ErrorClass,
        #[source]
        source: RemoteError,
    },

    #[error("chunk {index} exhausted its retry budget ({attempts} attempts)")]
    RetriesExhausted { index: usize, attempts: u32 },

    #[error("invalid transfer input: {0}")]
    InvalidInput(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("digest mismatch for chunk {index}")]
    DigestMismatch { index: usize },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// Wraps a remote failure with its classification.
    pub fn remote(source: RemoteError) -> Self {
        TransferError::Remote {
            class: ErrorClass::of(&source),
            source,
        }
    }

    /// Returns the error class if this wraps a remote failure.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            TransferError::Remote { class, .. } => Some(*class),
            _ => None,
        }
    }
}
