//! Error type returned by remote store calls.

/// Failure of a single remote call.
///
/// The engine classifies these into retryable/fatal classes; this type
/// only records what happened on the wire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// The remote answered with a non-success status code.
    #[error("remote returned {code}: {message}")]
    Status { code: u16, message: String },

    /// The request never completed (connection refused, reset, DNS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("operation timed out")]
    Timeout,
}

impl RemoteError {
    /// Convenience constructor for a status failure.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            code,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code, if this was a status failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}
