//! Abstract remote chunk store.
//!
//! The engine talks to the remote through this trait so transfer logic
//! stays decoupled from the HTTP transport and testable with mocks. The
//! methods map one-to-one onto the documented store API
//! (`/upload/initiate`, `/upload/{id}/chunk`, `/upload/{id}/complete`,
//! status/pause/resume/abort, and the symmetric download side).

use std::future::Future;
use std::pin::Pin;

use ferry_protocol::messages::{
    ChunkHeader, CompleteUploadRequest, InitiateDownloadRequest, InitiateDownloadResponse,
    InitiateUploadRequest, InitiateUploadResponse, ResumeResponse, SessionStatusResponse,
};
use ferry_protocol::types::{FileMetadata, TransferDirection};
use ferry_protocol::RemoteError;

/// Boxed future returned by [`RemoteStore`] methods.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Client-side view of the remote chunk store.
pub trait RemoteStore: Send + Sync {
    /// Registers a new upload session; the remote allocates a session ID.
    fn initiate_upload<'a>(
        &'a self,
        req: &'a InitiateUploadRequest,
    ) -> RemoteFuture<'a, InitiateUploadResponse>;

    /// Sends one chunk's bytes with its addressing/integrity header.
    fn upload_chunk<'a>(
        &'a self,
        session_id: &'a str,
        header: &'a ChunkHeader,
        data: &'a [u8],
    ) -> RemoteFuture<'a, ()>;

    /// Finalizes an upload: the remote assembles the chunks and verifies
    /// them against the manifest.
    fn complete_upload<'a>(
        &'a self,
        session_id: &'a str,
        req: &'a CompleteUploadRequest,
    ) -> RemoteFuture<'a, FileMetadata>;

    /// Registers a download session; the remote verifies the file exists
    /// and reports its size.
    fn initiate_download<'a>(
        &'a self,
        req: &'a InitiateDownloadRequest,
    ) -> RemoteFuture<'a, InitiateDownloadResponse>;

    /// Fetches one chunk's byte range.
    fn fetch_chunk<'a>(
        &'a self,
        session_id: &'a str,
        header: &'a ChunkHeader,
    ) -> RemoteFuture<'a, Vec<u8>>;

    /// Confirms a finished download against the chunk manifest.
    fn confirm_download<'a>(
        &'a self,
        session_id: &'a str,
        req: &'a CompleteUploadRequest,
    ) -> RemoteFuture<'a, ()>;

    /// Queries which chunks the remote considers complete.
    fn session_status<'a>(
        &'a self,
        direction: TransferDirection,
        session_id: &'a str,
    ) -> RemoteFuture<'a, SessionStatusResponse>;

    /// Tells the remote the session is paused.
    fn pause_session<'a>(
        &'a self,
        direction: TransferDirection,
        session_id: &'a str,
    ) -> RemoteFuture<'a, ()>;

    /// Resumes a paused session. The response carries the authoritative
    /// set of still-missing chunk indices.
    fn resume_session<'a>(
        &'a self,
        direction: TransferDirection,
        session_id: &'a str,
    ) -> RemoteFuture<'a, ResumeResponse>;

    /// Discards the session and any partial server-side state.
    fn abort_session<'a>(
        &'a self,
        direction: TransferDirection,
        session_id: &'a str,
    ) -> RemoteFuture<'a, ()>;
}
