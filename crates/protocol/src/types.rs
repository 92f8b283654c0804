use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    #[serde(rename = "upload")]
    Upload,
    #[serde(rename = "download")]
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// Lifecycle state of a transfer session.
///
/// Legal transitions:
/// `Initiating → Transferring ⇄ Paused`,
/// `Transferring → Completing → Completed`,
/// `Transferring | Paused → Cancelling → Cancelled`,
/// `Transferring → Failed` (also from `Initiating`/`Completing` when the
/// remote rejects the session). `Completed`, `Cancelled` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "initiating")]
    Initiating,
    #[serde(rename = "transferring")]
    Transferring,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completing")]
    Completing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelling")]
    Cancelling,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "failed")]
    Failed,
}

impl SessionStatus {
    /// Returns `true` for states no session ever leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    /// Returns `true` if a transition from `self` to `to` is legal.
    pub fn can_transition(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Initiating, Transferring)
                | (Initiating, Failed)
                | (Initiating, Cancelling)
                | (Transferring, Paused)
                | (Transferring, Completing)
                | (Transferring, Cancelling)
                | (Transferring, Failed)
                | (Paused, Transferring)
                | (Paused, Cancelling)
                | (Completing, Completed)
                | (Completing, Failed)
                | (Cancelling, Cancelled)
        )
    }
}

/// One entry of the chunk manifest sent at finalization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifestEntry {
    pub index: usize,
    pub size: i64,
    pub digest: String,
}

/// Metadata the remote returns once an upload is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub remote_id: String,
    pub file_name: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

/// Derived per-session progress view. Holds no state of its own; it is
/// recomputed from the live session on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub direction: TransferDirection,
    pub file_name: String,
    pub status: SessionStatus,
    pub total_bytes: i64,
    pub transferred_bytes: i64,
    /// Instantaneous speed over a short sliding window, in bytes/second.
    pub bytes_per_second: f64,
    /// Estimated seconds to completion. Absent while speed is zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ProgressSnapshot {
    /// Returns transfer progress as a percentage (0–100).
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Cross-session summary, a pure fold over all tracked sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub active_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_bytes: i64,
    pub transferred_bytes: i64,
    /// Sum of instantaneous speeds of active sessions, bytes/second.
    pub average_speed: f64,
}
