//! Resumable chunked transfer engine.
//!
//! Moves large files to and from a remote chunk store: files are split
//! into fixed-size chunks, transferred with bounded parallelism, verified
//! by SHA-256 digest, retried on transient failures, and can be paused,
//! resumed, and cancelled mid-flight. Progress is aggregated live across
//! all concurrent sessions.
//!
//! The public entry point is [`TransferEngine`]; everything else is
//! plumbing it drives:
//!
//! - [`chunk`]: deterministic partitioning into chunk descriptors
//! - [`retry`]: error classification and backoff
//! - [`limiter`]: per-session concurrency gate
//! - [`remote`]: the [`RemoteStore`] trait the transport implements
//! - [`session`]: per-transfer state and the status state machine
//! - [`progress`]: sliding-window speed, ETA, cross-session summary

mod chunk;
mod driver;
mod engine;
mod error;
mod fileio;
mod hasher;
mod limiter;
mod progress;
mod remote;
mod retry;
mod session;
mod validation;
mod worker;

pub use chunk::{ChunkDescriptor, ChunkState, partition};
pub use engine::{EngineConfig, TransferEngine, TransferEvent};
pub use error::{ErrorClass, TransferError};
pub use hasher::digest_bytes;
pub use limiter::{ChunkGate, concurrency_for};
pub use progress::{SpeedCalculator, aggregate};
pub use remote::{RemoteFuture, RemoteStore};
pub use retry::{RetryDecision, RetryPolicy};
pub use session::TransferSession;

/// Default chunk size: 1 MiB.
///
/// Callers can override it per engine via [`EngineConfig`]. Chunk
/// geometry is fixed at initiate time; the remote negotiates nothing.
pub const DEFAULT_CHUNK_SIZE: i64 = 1024 * 1024;
