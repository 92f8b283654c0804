//! Chunk integrity digests.
//!
//! SHA-256, hex-encoded. A chunk is hashed at most once: the digest is
//! cached on its descriptor and reused across retries and resumes.

use sha2::{Digest, Sha256};

use crate::error::TransferError;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hashes `data` on the blocking pool, keeping CPU work off the transfer's
/// critical path. The buffer is handed back alongside the digest.
pub async fn digest_off_thread(data: Vec<u8>) -> Result<(Vec<u8>, String), TransferError> {
    tokio::task::spawn_blocking(move || {
        let digest = digest_bytes(&data);
        (data, digest)
    })
    .await
    .map_err(|e| TransferError::InvalidInput(format!("hash task join error: {e}")))
}
