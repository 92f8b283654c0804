//! Per-session concurrency gate.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Large-file thresholds for the concurrency heuristic.
const LARGE_FILE: i64 = 512 * 1024 * 1024;
const HUGE_FILE: i64 = 2 * 1024 * 1024 * 1024;

/// Computes the in-flight chunk bound for a session.
///
/// Pure and total: the result is always in `[2, 10]`. Concurrency ramps
/// with chunk count (one slot per five chunks) so small files finish fast,
/// while the per-size cap shrinks for very large files so a single huge
/// transfer does not hold dozens of simultaneous streams against the
/// remote endpoint.
pub fn concurrency_for(total_size: i64, total_chunks: usize) -> usize {
    let ramp = ((total_chunks + 4) / 5).max(2);
    let cap = if total_size >= HUGE_FILE {
        4
    } else if total_size >= LARGE_FILE {
        6
    } else {
        8
    };
    ramp.min(cap).clamp(2, 10)
}

/// Counting admission gate bounding simultaneous chunk transfers.
///
/// Workers acquire a slot before transferring. The permit is released on
/// drop whether the chunk succeeded, failed, or was interrupted, so the
/// gate never leaks capacity. Waiters are served in arrival order.
#[derive(Debug, Clone)]
pub struct ChunkGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ChunkGate {
    /// Creates a gate sized by [`concurrency_for`].
    pub fn new(total_size: i64, total_chunks: usize) -> Self {
        let limit = concurrency_for(total_size, total_chunks);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Waits for a transfer slot.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed; acquire can only fail after
        // close, so this cannot panic in practice.
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("gate semaphore is never closed"))
    }

    /// Configured slot count.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
