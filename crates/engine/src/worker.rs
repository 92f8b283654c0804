//! Chunk worker: transfers one chunk, with retry and cancellable backoff.
//!
//! A worker owns its chunk exclusively for the duration of the task. It
//! acquires a gate slot, moves the bytes, applies the retry policy on
//! failure, and reports a single [`ChunkOutcome`] back to the session
//! driver, which is the only place session state is mutated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferry_protocol::messages::ChunkHeader;
use ferry_protocol::types::TransferDirection;

use crate::chunk::ChunkDescriptor;
use crate::error::{ErrorClass, TransferError};
use crate::hasher::{digest_bytes, digest_off_thread};
use crate::limiter::ChunkGate;
use crate::remote::RemoteStore;
use crate::fileio;
use crate::retry::RetryPolicy;

/// Terminal report of one chunk worker.
#[derive(Debug)]
pub(crate) enum ChunkOutcome {
    /// Transferred and acknowledged.
    Completed {
        index: usize,
        attempt: u32,
        duration: Duration,
        digest: String,
        conflicts: u64,
    },
    /// Stopped by the session's halt token (pause or cancel). The chunk
    /// goes back to `Pending`; no attempt was consumed by the
    /// interruption itself. A digest computed before the interruption is
    /// handed back for caching.
    Interrupted {
        index: usize,
        digest: Option<String>,
        conflicts: u64,
    },
    /// Fatal failure (non-retryable class or retry budget exhausted).
    Failed {
        index: usize,
        attempt: u32,
        error: TransferError,
        conflicts: u64,
    },
}

/// Everything a worker needs, shared across all workers of one session.
pub(crate) struct WorkerContext {
    pub remote: Arc<dyn RemoteStore>,
    pub direction: TransferDirection,
    pub remote_session_id: String,
    pub local_path: PathBuf,
    pub retry: RetryPolicy,
    pub gate: ChunkGate,
    pub halt: CancellationToken,
}

/// Runs one chunk to a terminal outcome. Never panics, never leaks the
/// gate permit (RAII), and honors the halt token at every suspension
/// point: the permit wait, the remote call, and the backoff sleep.
pub(crate) async fn run_chunk(ctx: Arc<WorkerContext>, chunk: ChunkDescriptor) -> ChunkOutcome {
    let index = chunk.index;

    // Admission: no chunk may start while the gate is saturated.
    let _permit = tokio::select! {
        permit = ctx.gate.acquire() => permit,
        _ = ctx.halt.cancelled() => {
            return ChunkOutcome::Interrupted { index, digest: None, conflicts: 0 };
        }
    };

    match ctx.direction {
        TransferDirection::Upload => run_upload(ctx.as_ref(), chunk).await,
        TransferDirection::Download => run_download(ctx.as_ref(), chunk).await,
    }
}

async fn run_upload(ctx: &WorkerContext, chunk: ChunkDescriptor) -> ChunkOutcome {
    let index = chunk.index;
    let (offset, len) = chunk.range();

    // The chunk bytes are read once and reused across retries.
    let data = match fileio::read_range(&ctx.local_path, offset, len).await {
        Ok(data) => data,
        Err(e) => {
            return ChunkOutcome::Failed {
                index,
                attempt: chunk.attempt,
                error: e,
                conflicts: 0,
            };
        }
    };

    // Digest once per chunk; a cached digest (from a paused attempt or an
    // earlier retry) is reused verbatim.
    let (data, digest) = if chunk.digest.is_empty() {
        match digest_off_thread(data).await {
            Ok(pair) => pair,
            Err(e) => {
                return ChunkOutcome::Failed {
                    index,
                    attempt: chunk.attempt,
                    error: e,
                    conflicts: 0,
                };
            }
        }
    } else {
        (data, chunk.digest.clone())
    };

    let header = ChunkHeader {
        index,
        start: chunk.offset_start,
        end: chunk.offset_end,
        size: chunk.size,
        digest: digest.clone(),
    };

    let mut attempt = chunk.attempt;
    let mut conflicts = 0u64;
    loop {
        attempt += 1;
        let started = Instant::now();
        let result = tokio::select! {
            res = ctx.remote.upload_chunk(&ctx.remote_session_id, &header, &data) => res,
            _ = ctx.halt.cancelled() => {
                return ChunkOutcome::Interrupted { index, digest: Some(digest), conflicts };
            }
        };

        match result {
            Ok(()) => {
                debug!(session = %ctx.remote_session_id, chunk = index, attempt, "chunk uploaded");
                return ChunkOutcome::Completed {
                    index,
                    attempt,
                    duration: started.elapsed(),
                    digest,
                    conflicts,
                };
            }
            Err(err) => {
                match handle_failure(ctx, index, attempt, &mut conflicts, err).await {
                    FailureStep::Retry => continue,
                    FailureStep::Interrupted => {
                        return ChunkOutcome::Interrupted {
                            index,
                            digest: Some(digest),
                            conflicts,
                        };
                    }
                    FailureStep::Fatal(error) => {
                        return ChunkOutcome::Failed {
                            index,
                            attempt,
                            error,
                            conflicts,
                        };
                    }
                }
            }
        }
    }
}

async fn run_download(ctx: &WorkerContext, chunk: ChunkDescriptor) -> ChunkOutcome {
    let index = chunk.index;
    let header = ChunkHeader {
        index,
        start: chunk.offset_start,
        end: chunk.offset_end,
        size: chunk.size,
        digest: chunk.digest.clone(),
    };

    let mut attempt = chunk.attempt;
    let mut conflicts = 0u64;
    loop {
        attempt += 1;
        let started = Instant::now();
        let result = tokio::select! {
            res = ctx.remote.fetch_chunk(&ctx.remote_session_id, &header) => res,
            _ = ctx.halt.cancelled() => {
                return ChunkOutcome::Interrupted { index, digest: None, conflicts };
            }
        };

        match result {
            Ok(data) => {
                if data.len() != chunk.size as usize {
                    return ChunkOutcome::Failed {
                        index,
                        attempt,
                        error: TransferError::InvalidInput(format!(
                            "remote served {} bytes for chunk {index}, expected {}",
                            data.len(),
                            chunk.size
                        )),
                        conflicts,
                    };
                }
                let digest = digest_bytes(&data);
                // A digest known up front (e.g. from a resumed session)
                // must match what the remote served.
                if !chunk.digest.is_empty() && chunk.digest != digest {
                    return ChunkOutcome::Failed {
                        index,
                        attempt,
                        error: TransferError::DigestMismatch { index },
                        conflicts,
                    };
                }
                if let Err(e) = fileio::write_range(&ctx.local_path, chunk.offset_start, data).await
                {
                    return ChunkOutcome::Failed {
                        index,
                        attempt,
                        error: e,
                        conflicts,
                    };
                }
                debug!(session = %ctx.remote_session_id, chunk = index, attempt, "chunk downloaded");
                return ChunkOutcome::Completed {
                    index,
                    attempt,
                    duration: started.elapsed(),
                    digest,
                    conflicts,
                };
            }
            Err(err) => match handle_failure(ctx, index, attempt, &mut conflicts, err).await {
                FailureStep::Retry => continue,
                FailureStep::Interrupted => {
                    return ChunkOutcome::Interrupted {
                        index,
                        digest: None,
                        conflicts,
                    };
                }
                FailureStep::Fatal(error) => {
                    return ChunkOutcome::Failed {
                        index,
                        attempt,
                        error,
                        conflicts,
                    };
                }
            },
        }
    }
}

enum FailureStep {
    Retry,
    Interrupted,
    Fatal(TransferError),
}

/// Consults the retry policy for a failed attempt and sleeps out the
/// backoff (unless the halt token fires first).
async fn handle_failure(
    ctx: &WorkerContext,
    index: usize,
    attempt: u32,
    conflicts: &mut u64,
    err: ferry_protocol::RemoteError,
) -> FailureStep {
    let class = ErrorClass::of(&err);
    if class == ErrorClass::OrderingConflict {
        *conflicts += 1;
    }

    let decision = ctx.retry.decide(class, attempt);
    if !decision.retry {
        warn!(
            session = %ctx.remote_session_id,
            chunk = index,
            attempt,
            class = %class,
            error = %err,
            "chunk failed fatally"
        );
        let error = if class.is_retryable() {
            TransferError::RetriesExhausted {
                index,
                attempts: attempt,
            }
        } else {
            TransferError::remote(err)
        };
        return FailureStep::Fatal(error);
    }

    warn!(
        session = %ctx.remote_session_id,
        chunk = index,
        attempt,
        class = %class,
        delay_ms = decision.delay.as_millis() as u64,
        "retrying chunk"
    );

    tokio::select! {
        _ = tokio::time::sleep(decision.delay) => FailureStep::Retry,
        _ = ctx.halt.cancelled() => FailureStep::Interrupted,
    }
}
