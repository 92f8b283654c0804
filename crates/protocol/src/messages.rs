use serde::{Deserialize, Serialize};

use crate::types::ChunkManifestEntry;

// ---------------------------------------------------------------------------
// Upload session payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session (`POST /upload/initiate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub file_name: String,
    pub file_size: i64,
    pub total_chunks: usize,
    pub chunk_size: i64,
}

/// Response to [`InitiateUploadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub session_id: String,
}

/// Header accompanying one chunk's bytes (`POST /upload/{id}/chunk`).
///
/// The chunk bytes travel as the binary request body; this header carries
/// the addressing and integrity metadata. `end` is inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub index: usize,
    pub start: i64,
    pub end: i64,
    pub size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

/// Finalizes an upload with the full chunk manifest
/// (`POST /upload/{id}/complete`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub chunks: Vec<ChunkManifestEntry>,
}

// ---------------------------------------------------------------------------
// Session status / resume payloads (shared by both directions)
// ---------------------------------------------------------------------------

/// Response to `GET /{direction}/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    /// Indices the remote has already received (upload) or served and
    /// acknowledged (download).
    pub completed_chunks: Vec<usize>,
    pub total_chunks: usize,
}

/// Response to `POST /{direction}/{id}/resume`.
///
/// The remote is the source of truth for what is still missing; the local
/// chunk table is reconciled against this set so resume survives client
/// restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub missing_chunks: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Download session payloads
// ---------------------------------------------------------------------------

/// Starts a download session (`POST /download/initiate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateDownloadRequest {
    pub remote_id: String,
}

/// Response to [`InitiateDownloadRequest`]: the remote verifies the file
/// exists and is readable, and reports its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateDownloadResponse {
    pub session_id: String,
    pub file_name: String,
    pub file_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_upload_json_is_camel_case() {
        let req = InitiateUploadRequest {
            file_name: "video.mp4".into(),
            file_size: 10_485_760,
            total_chunks: 10,
            chunk_size: 1_048_576,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"fileName\""));
        assert!(json.contains("\"totalChunks\""));
        assert!(!json.contains("file_name"));
        let parsed: InitiateUploadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, parsed);
    }

    #[test]
    fn chunk_header_omits_empty_digest() {
        let header = ChunkHeader {
            index: 0,
            start: 0,
            end: 1023,
            size: 1024,
            digest: String::new(),
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(!json.contains("digest"));
    }

    #[test]
    fn resume_response_roundtrip() {
        let resp = ResumeResponse {
            missing_chunks: vec![3, 4, 5, 9],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"missingChunks\""));
        let parsed: ResumeResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, parsed);
    }

    #[test]
    fn complete_request_carries_manifest() {
        let req = CompleteUploadRequest {
            chunks: vec![ChunkManifestEntry {
                index: 0,
                size: 1024,
                digest: "00".repeat(32),
            }],
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: CompleteUploadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].index, 0);
    }
}
