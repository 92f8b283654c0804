//! Chunk descriptors and the deterministic partitioner.

use std::time::Duration;

use crate::error::TransferError;

/// State of a single chunk within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not yet handed to a worker (or handed back after pause/cancel).
    Pending,
    /// A worker currently owns the transfer.
    InFlight,
    /// Transferred and acknowledged by the remote.
    Completed,
    /// Fatally failed; the session fails with it.
    Failed,
}

/// One contiguous byte range of the file, transferred as a unit.
///
/// Descriptors are created at partition time and owned exclusively by the
/// session; a chunk's `state`/`attempt`/`digest` are only ever mutated
/// through the session's single owning task, never by two workers.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub index: usize,
    /// First byte of the range.
    pub offset_start: i64,
    /// Last byte of the range, inclusive.
    pub offset_end: i64,
    pub size: i64,
    /// Hex SHA-256 of the chunk bytes. Empty until first computed; cached
    /// so retries and resumes never re-hash.
    pub digest: String,
    /// Transfer attempts consumed so far (interruptions don't count).
    pub attempt: u32,
    pub state: ChunkState,
    /// Wall time of the successful transfer attempt.
    pub transfer_duration: Option<Duration>,
}

impl ChunkDescriptor {
    /// Byte range as `(offset, length)` for positioned I/O.
    pub fn range(&self) -> (i64, usize) {
        (self.offset_start, self.size as usize)
    }
}

/// Splits a byte stream of known length into an ordered sequence of chunk
/// descriptors.
///
/// For chunk *i*: `offset_start = i * chunk_size` and
/// `offset_end = min(offset_start + chunk_size, total_size) - 1`. The
/// ranges are contiguous, non-overlapping, and their union is exactly
/// `[0, total_size)`. A zero-length file partitions into zero chunks.
pub fn partition(total_size: i64, chunk_size: i64) -> Result<Vec<ChunkDescriptor>, TransferError> {
    if total_size < 0 {
        return Err(TransferError::InvalidInput(format!(
            "negative file size: {total_size}"
        )));
    }
    if chunk_size <= 0 {
        return Err(TransferError::InvalidInput(format!(
            "non-positive chunk size: {chunk_size}"
        )));
    }

    let count = (total_size + chunk_size - 1) / chunk_size;
    let mut chunks = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(total_size) - 1;
        chunks.push(ChunkDescriptor {
            index: i as usize,
            offset_start: start,
            offset_end: end,
            size: end - start + 1,
            digest: String::new(),
            attempt: 0,
            state: ChunkState::Pending,
            transfer_duration: None,
        });
    }
    Ok(chunks)
}
