//! Per-transfer session state.
//!
//! One `TransferSession` owns the full chunk table for one file transfer.
//! All mutation goes through the session's driver task, which serializes
//! state changes; the lock here exists so readers (progress snapshots,
//! the cross-session fold) can observe a consistent view concurrently.
//!
//! `transferred_bytes` is never incremented. It is recomputed from the
//! chunk table on every state-affecting event, which makes pause/resume
//! idempotent and rules out double counting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use ferry_protocol::types::{
    ChunkManifestEntry, ProgressSnapshot, SessionStatus, TransferDirection,
};

use crate::chunk::{ChunkDescriptor, ChunkState};
use crate::error::TransferError;
use crate::progress::SpeedCalculator;

pub struct TransferSession {
    id: String,
    direction: TransferDirection,
    local_path: PathBuf,
    chunk_size: i64,
    started_at: DateTime<Utc>,
    speed: SpeedCalculator,
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    status: SessionStatus,
    file_name: String,
    total_size: i64,
    chunks: BTreeMap<usize, ChunkDescriptor>,
    transferred_bytes: i64,
    remote_session_id: String,
    conflict_count: u64,
    last_error: String,
    paused_at: Option<Instant>,
    total_paused: Duration,
}

impl TransferSession {
    /// Creates a session in `Initiating`. For downloads, `file_name` and
    /// `total_size` are placeholders until the remote reports them via
    /// [`set_remote_info`](Self::set_remote_info).
    pub fn new(
        id: String,
        direction: TransferDirection,
        file_name: String,
        local_path: &Path,
        total_size: i64,
        chunk_size: i64,
    ) -> Self {
        Self {
            id,
            direction,
            local_path: local_path.to_path_buf(),
            chunk_size,
            started_at: Utc::now(),
            speed: SpeedCalculator::default(),
            inner: RwLock::new(SessionInner {
                status: SessionStatus::Initiating,
                file_name,
                total_size,
                chunks: BTreeMap::new(),
                transferred_bytes: 0,
                remote_session_id: String::new(),
                conflict_count: 0,
                last_error: String::new(),
                paused_at: None,
                total_paused: Duration::ZERO,
            }),
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn chunk_size(&self) -> i64 {
        self.chunk_size
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.read().unwrap().status
    }

    pub fn file_name(&self) -> String {
        self.inner.read().unwrap().file_name.clone()
    }

    pub fn total_size(&self) -> i64 {
        self.inner.read().unwrap().total_size
    }

    pub fn transferred_bytes(&self) -> i64 {
        self.inner.read().unwrap().transferred_bytes
    }

    pub fn remote_session_id(&self) -> String {
        self.inner.read().unwrap().remote_session_id.clone()
    }

    pub fn conflict_count(&self) -> u64 {
        self.inner.read().unwrap().conflict_count
    }

    pub fn last_error(&self) -> String {
        self.inner.read().unwrap().last_error.clone()
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    /// Cumulative time spent in `Paused`.
    pub fn total_paused(&self) -> Duration {
        self.inner.read().unwrap().total_paused
    }

    pub fn is_active(&self) -> bool {
        !self.status().is_terminal()
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.read().unwrap().chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Option<ChunkDescriptor> {
        self.inner.read().unwrap().chunks.get(&index).cloned()
    }

    // -- lifecycle ---------------------------------------------------------

    /// Moves the session to `to`, enforcing the state machine. Pause
    /// bookkeeping (pause timestamps, speed-window reset) happens here so
    /// no caller can skip it.
    pub fn try_transition(&self, to: SessionStatus) -> Result<(), TransferError> {
        let mut s = self.inner.write().unwrap();
        if !s.status.can_transition(to) {
            return Err(TransferError::IllegalTransition {
                from: format!("{:?}", s.status),
                to: format!("{to:?}"),
            });
        }
        if to == SessionStatus::Paused {
            s.paused_at = Some(Instant::now());
            self.speed.reset();
        } else if s.status == SessionStatus::Paused {
            if let Some(at) = s.paused_at.take() {
                s.total_paused += at.elapsed();
            }
        }
        s.status = to;
        Ok(())
    }

    pub fn set_remote_session(&self, remote_id: &str) {
        self.inner.write().unwrap().remote_session_id = remote_id.to_string();
    }

    /// Records the file name and size the remote reported for a download.
    pub fn set_remote_info(&self, file_name: &str, total_size: i64) {
        let mut s = self.inner.write().unwrap();
        s.file_name = file_name.to_string();
        s.total_size = total_size;
    }

    /// Installs the partitioned chunk table.
    pub fn install_chunks(&self, chunks: Vec<ChunkDescriptor>) {
        let mut s = self.inner.write().unwrap();
        s.chunks = chunks.into_iter().map(|c| (c.index, c)).collect();
        recompute_transferred(&mut s);
    }

    pub fn set_last_error(&self, err: &str) {
        self.inner.write().unwrap().last_error = err.to_string();
    }

    // -- chunk table mutation (driver-serialized) --------------------------

    pub fn mark_in_flight(&self, index: usize) {
        let mut s = self.inner.write().unwrap();
        if let Some(c) = s.chunks.get_mut(&index) {
            c.state = ChunkState::InFlight;
        }
    }

    /// Hands an interrupted chunk back to the queue. Used on pause and
    /// cancel: the chunk is not failed and its attempt counter is kept.
    pub fn return_pending(&self, index: usize) {
        let mut s = self.inner.write().unwrap();
        if let Some(c) = s.chunks.get_mut(&index) {
            if c.state == ChunkState::InFlight {
                c.state = ChunkState::Pending;
            }
        }
        recompute_transferred(&mut s);
    }

    /// Caches a digest computed by a worker so no retry or resume ever
    /// re-hashes the chunk.
    pub fn cache_digest(&self, index: usize, digest: &str) {
        let mut s = self.inner.write().unwrap();
        if let Some(c) = s.chunks.get_mut(&index) {
            if c.digest.is_empty() {
                c.digest = digest.to_string();
            }
        }
    }

    pub fn record_completed(&self, index: usize, attempt: u32, duration: Duration, digest: &str) {
        let size = {
            let mut s = self.inner.write().unwrap();
            let size = match s.chunks.get_mut(&index) {
                Some(c) => {
                    c.state = ChunkState::Completed;
                    c.attempt = attempt;
                    c.transfer_duration = Some(duration);
                    if c.digest.is_empty() {
                        c.digest = digest.to_string();
                    }
                    c.size
                }
                None => 0,
            };
            recompute_transferred(&mut s);
            size
        };
        if size > 0 {
            self.speed.add_sample(size);
        }
    }

    pub fn record_failed(&self, index: usize, attempt: u32) {
        let mut s = self.inner.write().unwrap();
        if let Some(c) = s.chunks.get_mut(&index) {
            c.state = ChunkState::Failed;
            c.attempt = attempt;
        }
        recompute_transferred(&mut s);
    }

    pub fn add_conflicts(&self, n: u64) {
        self.inner.write().unwrap().conflict_count += n;
    }

    /// Reconciles the chunk table with the remote's authoritative
    /// missing-chunk set on resume: listed chunks become `Pending`,
    /// everything else is `Completed` (cached digests survive).
    pub fn apply_remote_missing(&self, missing: &[usize]) {
        let mut s = self.inner.write().unwrap();
        for c in s.chunks.values_mut() {
            if missing.contains(&c.index) {
                c.state = ChunkState::Pending;
                c.transfer_duration = None;
            } else {
                c.state = ChunkState::Completed;
            }
        }
        recompute_transferred(&mut s);
    }

    // -- derived views -----------------------------------------------------

    pub fn pending_indices(&self) -> Vec<usize> {
        let s = self.inner.read().unwrap();
        s.chunks
            .values()
            .filter(|c| c.state == ChunkState::Pending)
            .map(|c| c.index)
            .collect()
    }

    /// Indices that never completed, reported in terminal failure events
    /// so a future resume can skip finished work.
    pub fn incomplete_indices(&self) -> Vec<usize> {
        let s = self.inner.read().unwrap();
        s.chunks
            .values()
            .filter(|c| c.state != ChunkState::Completed)
            .map(|c| c.index)
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        let s = self.inner.read().unwrap();
        s.chunks.values().all(|c| c.state == ChunkState::Completed)
    }

    /// Full chunk manifest (index, size, digest) for finalization.
    pub fn manifest(&self) -> Vec<ChunkManifestEntry> {
        let s = self.inner.read().unwrap();
        s.chunks
            .values()
            .map(|c| ChunkManifestEntry {
                index: c.index,
                size: c.size,
                digest: c.digest.clone(),
            })
            .collect()
    }

    /// Derived progress view; recomputed from live state on demand.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let s = self.inner.read().unwrap();
        let speed = self.speed.bytes_per_second();
        let remaining = s.total_size - s.transferred_bytes;
        ProgressSnapshot {
            session_id: self.id.clone(),
            direction: self.direction,
            file_name: s.file_name.clone(),
            status: s.status,
            total_bytes: s.total_size,
            transferred_bytes: s.transferred_bytes,
            bytes_per_second: speed,
            eta_seconds: self.speed.eta(remaining).map(|d| d.as_secs_f64()),
            started_at: self.started_at,
            error: s.last_error.clone(),
        }
    }
}

fn recompute_transferred(s: &mut SessionInner) {
    s.transferred_bytes = s
        .chunks
        .values()
        .filter(|c| c.state == ChunkState::Completed)
        .map(|c| c.size)
        .sum();
}
