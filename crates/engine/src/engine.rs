//! Public engine surface: session registry, lifecycle commands, and the
//! event stream.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use ferry_protocol::types::{AggregateSnapshot, ProgressSnapshot, TransferDirection};

use crate::driver::{SessionCommand, SessionDriver};
use crate::error::TransferError;
use crate::fileio;
use crate::progress;
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::session::TransferSession;
use crate::DEFAULT_CHUNK_SIZE;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chunk size in bytes for all sessions started by this engine.
    pub chunk_size: i64,
    /// Per-chunk retry policy handed to every worker.
    pub retry: RetryPolicy,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            event_capacity: 256,
        }
    }
}

/// Session lifecycle notifications, in the order the driver produced
/// them. Serializable so callers can forward them to a UI or log sink
/// as-is.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransferEvent {
    Started {
        session_id: String,
    },
    ChunkCompleted {
        session_id: String,
        index: usize,
        transferred_bytes: i64,
    },
    Paused {
        session_id: String,
    },
    Resumed {
        session_id: String,
    },
    Completed {
        session_id: String,
        /// Store-assigned file ID for uploads, the requested ID for
        /// downloads.
        remote_id: String,
    },
    Failed {
        session_id: String,
        error: String,
        /// Chunks that never completed; a fresh session can skip the
        /// rest.
        incomplete_chunks: Vec<usize>,
    },
    Cancelled {
        session_id: String,
        incomplete_chunks: Vec<usize>,
    },
}

struct SessionHandle {
    session: Arc<TransferSession>,
    commands: mpsc::Sender<SessionCommand>,
}

/// Resumable chunked transfer engine.
///
/// Each `start_*` call registers a session and spawns its driver task;
/// the call returns as soon as the session exists, and everything after
/// that is observable through [`TransferEvent`]s and progress snapshots.
/// Terminal sessions stay in the registry (and in the aggregate view)
/// until [`acknowledge`](Self::acknowledge)d.
pub struct TransferEngine {
    remote: Arc<dyn RemoteStore>,
    config: EngineConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl TransferEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            remote,
            config,
            sessions: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the receiving end of the event stream. Can only be taken
    /// once; returns `None` afterwards.
    pub fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Starts uploading the file at `path`. Returns the new session ID
    /// once the session is registered; the transfer itself runs in the
    /// background.
    pub async fn start_upload(&self, path: &Path) -> Result<String, TransferError> {
        if self.config.chunk_size <= 0 {
            return Err(TransferError::InvalidInput(format!(
                "non-positive chunk size: {}",
                self.config.chunk_size
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                TransferError::InvalidPath(format!("no file name in {}", path.display()))
            })?;
        let size = fileio::file_size(path).await?;

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(TransferSession::new(
            id.clone(),
            TransferDirection::Upload,
            file_name,
            path,
            size,
            self.config.chunk_size,
        ));
        info!(session = %id, path = %path.display(), bytes = size, "upload session registered");
        self.spawn_driver(id.clone(), session, String::new());
        Ok(id)
    }

    /// Starts downloading the remote file `remote_id` into `dest_dir`.
    /// The file name and size come from the remote during initiation.
    pub fn start_download(
        &self,
        remote_id: &str,
        dest_dir: &Path,
    ) -> Result<String, TransferError> {
        if remote_id.is_empty() {
            return Err(TransferError::InvalidInput("empty remote file ID".into()));
        }
        if self.config.chunk_size <= 0 {
            return Err(TransferError::InvalidInput(format!(
                "non-positive chunk size: {}",
                self.config.chunk_size
            )));
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(TransferSession::new(
            id.clone(),
            TransferDirection::Download,
            String::new(),
            dest_dir,
            0,
            self.config.chunk_size,
        ));
        info!(session = %id, remote = remote_id, dest = %dest_dir.display(), "download session registered");
        self.spawn_driver(id.clone(), session, remote_id.to_string());
        Ok(id)
    }

    /// Pauses a transferring session. In-flight chunks stand down and
    /// return to the queue; completed chunks stay completed.
    pub async fn pause(&self, session_id: &str) -> Result<(), TransferError> {
        self.send_command(session_id, SessionCommand::Pause).await
    }

    /// Resumes a paused session, reconciling against the remote's
    /// missing-chunk set first.
    pub async fn resume(&self, session_id: &str) -> Result<(), TransferError> {
        self.send_command(session_id, SessionCommand::Resume).await
    }

    /// Cancels a session. Terminal and irreversible; remote state is
    /// discarded best effort.
    pub async fn cancel(&self, session_id: &str) -> Result<(), TransferError> {
        self.send_command(session_id, SessionCommand::Cancel).await
    }

    /// Progress snapshot of one session.
    pub fn snapshot(&self, session_id: &str) -> Result<ProgressSnapshot, TransferError> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(session_id)
            .map(|h| h.session.snapshot())
            .ok_or_else(|| TransferError::SessionNotFound(session_id.to_string()))
    }

    /// Progress snapshots of every registered session.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        let sessions = self.sessions.read().unwrap();
        let mut all: Vec<ProgressSnapshot> =
            sessions.values().map(|h| h.session.snapshot()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    /// Cross-session summary, recomputed from live state on every call.
    pub fn aggregate(&self) -> AggregateSnapshot {
        let sessions = self.sessions.read().unwrap();
        progress::aggregate(sessions.values().map(|h| h.session.as_ref()))
    }

    /// Drops a terminal session from the registry (and the aggregate
    /// view). Active sessions must be cancelled first.
    pub fn acknowledge(&self, session_id: &str) -> Result<(), TransferError> {
        let mut sessions = self.sessions.write().unwrap();
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| TransferError::SessionNotFound(session_id.to_string()))?;
        if handle.session.is_active() {
            return Err(TransferError::InvalidInput(format!(
                "session {session_id} is still active"
            )));
        }
        sessions.remove(session_id);
        Ok(())
    }

    /// Shared handle to a session, mainly for read-side inspection.
    pub fn session(&self, session_id: &str) -> Option<Arc<TransferSession>> {
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .map(|h| Arc::clone(&h.session))
    }

    fn spawn_driver(&self, id: String, session: Arc<TransferSession>, file_id: String) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let driver = SessionDriver::new(
            Arc::clone(&session),
            Arc::clone(&self.remote),
            self.config.retry.clone(),
            file_id,
            self.events_tx.clone(),
            cmd_rx,
        );
        self.sessions.write().unwrap().insert(
            id,
            SessionHandle {
                session,
                commands: cmd_tx,
            },
        );
        tokio::spawn(driver.run());
    }

    async fn send_command(
        &self,
        session_id: &str,
        cmd: SessionCommand,
    ) -> Result<(), TransferError> {
        let (tx, session) = {
            let sessions = self.sessions.read().unwrap();
            let handle = sessions
                .get(session_id)
                .ok_or_else(|| TransferError::SessionNotFound(session_id.to_string()))?;
            (handle.commands.clone(), Arc::clone(&handle.session))
        };
        // A closed channel means the driver already landed the session in
        // a terminal status.
        tx.send(cmd).await.map_err(|e| {
            let target = match e.0 {
                SessionCommand::Pause => "Paused",
                SessionCommand::Resume => "Transferring",
                SessionCommand::Cancel => "Cancelled",
            };
            TransferError::IllegalTransition {
                from: format!("{:?}", session.status()),
                to: target.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tempfile::TempDir;

    use ferry_protocol::messages::{
        ChunkHeader, CompleteUploadRequest, InitiateDownloadRequest, InitiateDownloadResponse,
        InitiateUploadRequest, InitiateUploadResponse, ResumeResponse, SessionStatusResponse,
    };
    use ferry_protocol::types::{FileMetadata, SessionStatus};
    use ferry_protocol::RemoteError;

    use crate::hasher::digest_bytes;
    use crate::remote::RemoteFuture;

    struct MockState {
        total_chunks: usize,
        /// Indices acknowledged by the remote, in arrival order.
        uploads: Vec<usize>,
        upload_failures: HashMap<usize, VecDeque<RemoteError>>,
        paused: bool,
        aborted: bool,
        completed: bool,
        manifest_len: Option<usize>,
        /// Served file for downloads.
        file_data: Vec<u8>,
        file_name: String,
    }

    struct MockRemote {
        state: Mutex<MockState>,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
        upload_delay: Duration,
    }

    /// Tracks an in-flight call; decrements on drop so cancelled futures
    /// are counted correctly.
    struct FlightGuard<'a>(&'a MockRemote);

    impl<'a> FlightGuard<'a> {
        fn enter(mock: &'a MockRemote) -> Self {
            let now = mock.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            mock.high_water.fetch_max(now, Ordering::SeqCst);
            Self(mock)
        }
    }

    impl Drop for FlightGuard<'_> {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockRemote {
        fn new() -> Self {
            Self {
                state: Mutex::new(MockState {
                    total_chunks: 0,
                    uploads: Vec::new(),
                    upload_failures: HashMap::new(),
                    paused: false,
                    aborted: false,
                    completed: false,
                    manifest_len: None,
                    file_data: Vec::new(),
                    file_name: String::new(),
                }),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                upload_delay: Duration::ZERO,
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                upload_delay: delay,
                ..Self::new()
            }
        }

        fn serve_file(&self, name: &str, data: Vec<u8>) {
            let mut s = self.state.lock().unwrap();
            s.file_name = name.to_string();
            s.file_data = data;
        }

        fn fail_chunk(&self, index: usize, errors: Vec<RemoteError>) {
            self.state
                .lock()
                .unwrap()
                .upload_failures
                .insert(index, errors.into());
        }

        fn uploads(&self) -> Vec<usize> {
            self.state.lock().unwrap().uploads.clone()
        }
    }

    impl RemoteStore for MockRemote {
        fn initiate_upload<'a>(
            &'a self,
            req: &'a InitiateUploadRequest,
        ) -> RemoteFuture<'a, InitiateUploadResponse> {
            Box::pin(async move {
                self.state.lock().unwrap().total_chunks = req.total_chunks;
                Ok(InitiateUploadResponse {
                    session_id: "remote-session".into(),
                })
            })
        }

        fn upload_chunk<'a>(
            &'a self,
            _session_id: &'a str,
            header: &'a ChunkHeader,
            _data: &'a [u8],
        ) -> RemoteFuture<'a, ()> {
            Box::pin(async move {
                let _guard = FlightGuard::enter(self);
                if !self.upload_delay.is_zero() {
                    tokio::time::sleep(self.upload_delay).await;
                }
                let mut s = self.state.lock().unwrap();
                if let Some(errors) = s.upload_failures.get_mut(&header.index) {
                    if let Some(err) = errors.pop_front() {
                        return Err(err);
                    }
                }
                s.uploads.push(header.index);
                Ok(())
            })
        }

        fn complete_upload<'a>(
            &'a self,
            _session_id: &'a str,
            req: &'a CompleteUploadRequest,
        ) -> RemoteFuture<'a, FileMetadata> {
            Box::pin(async move {
                let mut s = self.state.lock().unwrap();
                s.completed = true;
                s.manifest_len = Some(req.chunks.len());
                Ok(FileMetadata {
                    remote_id: "remote-file-1".into(),
                    file_name: String::new(),
                    size: req.chunks.iter().map(|c| c.size).sum(),
                    digest: String::new(),
                })
            })
        }

        fn initiate_download<'a>(
            &'a self,
            _req: &'a InitiateDownloadRequest,
        ) -> RemoteFuture<'a, InitiateDownloadResponse> {
            Box::pin(async move {
                let s = self.state.lock().unwrap();
                Ok(InitiateDownloadResponse {
                    session_id: "remote-session".into(),
                    file_name: s.file_name.clone(),
                    file_size: s.file_data.len() as i64,
                })
            })
        }

        fn fetch_chunk<'a>(
            &'a self,
            _session_id: &'a str,
            header: &'a ChunkHeader,
        ) -> RemoteFuture<'a, Vec<u8>> {
            Box::pin(async move {
                let _guard = FlightGuard::enter(self);
                if !self.upload_delay.is_zero() {
                    tokio::time::sleep(self.upload_delay).await;
                }
                let s = self.state.lock().unwrap();
                let start = header.start as usize;
                let end = header.end as usize + 1;
                if end > s.file_data.len() {
                    return Err(RemoteError::status(416, "range out of bounds"));
                }
                Ok(s.file_data[start..end].to_vec())
            })
        }

        fn confirm_download<'a>(
            &'a self,
            _session_id: &'a str,
            req: &'a CompleteUploadRequest,
        ) -> RemoteFuture<'a, ()> {
            Box::pin(async move {
                let mut s = self.state.lock().unwrap();
                s.completed = true;
                s.manifest_len = Some(req.chunks.len());
                Ok(())
            })
        }

        fn session_status<'a>(
            &'a self,
            _direction: TransferDirection,
            _session_id: &'a str,
        ) -> RemoteFuture<'a, SessionStatusResponse> {
            Box::pin(async move {
                let s = self.state.lock().unwrap();
                Ok(SessionStatusResponse {
                    completed_chunks: s.uploads.clone(),
                    total_chunks: s.total_chunks,
                })
            })
        }

        fn pause_session<'a>(
            &'a self,
            _direction: TransferDirection,
            _session_id: &'a str,
        ) -> RemoteFuture<'a, ()> {
            Box::pin(async move {
                self.state.lock().unwrap().paused = true;
                Ok(())
            })
        }

        fn resume_session<'a>(
            &'a self,
            _direction: TransferDirection,
            _session_id: &'a str,
        ) -> RemoteFuture<'a, ResumeResponse> {
            Box::pin(async move {
                let s = self.state.lock().unwrap();
                let missing = (0..s.total_chunks)
                    .filter(|i| !s.uploads.contains(i))
                    .collect();
                Ok(ResumeResponse {
                    missing_chunks: missing,
                })
            })
        }

        fn abort_session<'a>(
            &'a self,
            _direction: TransferDirection,
            _session_id: &'a str,
        ) -> RemoteFuture<'a, ()> {
            Box::pin(async move {
                self.state.lock().unwrap().aborted = true;
                Ok(())
            })
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            chunk_size: 1024,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                conflict_delay_min: Duration::from_millis(1),
                conflict_delay_max: Duration::from_millis(5),
                ..Default::default()
            },
            event_capacity: 256,
        }
    }

    fn fixture_file(dir: &TempDir, len: usize) -> std::path::PathBuf {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn recv_event(rx: &mut mpsc::Receiver<TransferEvent>) -> TransferEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn wait_terminal(rx: &mut mpsc::Receiver<TransferEvent>) -> TransferEvent {
        loop {
            let event = recv_event(rx).await;
            match event {
                TransferEvent::Completed { .. }
                | TransferEvent::Failed { .. }
                | TransferEvent::Cancelled { .. } => return event,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn upload_happy_path() {
        let dir = TempDir::new().unwrap();
        let path = fixture_file(&dir, 10 * 1024);
        let mock = Arc::new(MockRemote::new());
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();
        match wait_terminal(&mut events).await {
            TransferEvent::Completed {
                session_id,
                remote_id,
            } => {
                assert_eq!(session_id, id);
                assert_eq!(remote_id, "remote-file-1");
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let session = engine.session(&id).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.transferred_bytes(), 10 * 1024);

        let mut seen = mock.uploads();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        {
            let s = mock.state.lock().unwrap();
            assert!(s.completed);
            assert_eq!(s.manifest_len, Some(10));
        }

        let agg = engine.aggregate();
        assert_eq!(agg.completed_count, 1);
        assert_eq!(agg.active_count, 0);
        assert_eq!(agg.transferred_bytes, 10 * 1024);
    }

    #[tokio::test]
    async fn in_flight_chunks_never_exceed_the_limit() {
        let dir = TempDir::new().unwrap();
        // 10 chunks at this size get a limit of 2 slots.
        let path = fixture_file(&dir, 10 * 1024);
        let mock = Arc::new(MockRemote::with_delay(Duration::from_millis(15)));
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        engine.start_upload(&path).await.unwrap();
        assert!(matches!(
            wait_terminal(&mut events).await,
            TransferEvent::Completed { .. }
        ));

        let high = mock.high_water.load(Ordering::SeqCst);
        assert!(high <= 2, "high-water mark {high} exceeds the limit");
        assert!(high >= 1);
    }

    #[tokio::test]
    async fn pause_resume_does_not_resend_completed_chunks() {
        let dir = TempDir::new().unwrap();
        let path = fixture_file(&dir, 10 * 1024);
        let mock = Arc::new(MockRemote::with_delay(Duration::from_millis(25)));
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();

        // Let a couple of chunks land, then pause.
        let mut completed_before = Vec::new();
        loop {
            match recv_event(&mut events).await {
                TransferEvent::ChunkCompleted { index, .. } => {
                    completed_before.push(index);
                    if completed_before.len() == 2 {
                        break;
                    }
                }
                TransferEvent::Started { .. } => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        engine.pause(&id).await.unwrap();

        // Drain until the Paused event; completions already in flight may
        // still arrive before it.
        loop {
            match recv_event(&mut events).await {
                TransferEvent::Paused { .. } => break,
                TransferEvent::ChunkCompleted { index, .. } => completed_before.push(index),
                other => panic!("unexpected event {other:?}"),
            }
        }
        let session = engine.session(&id).unwrap();
        assert_eq!(session.status(), SessionStatus::Paused);
        assert!(mock.state.lock().unwrap().paused);
        let uploads_at_pause = mock.uploads().len();

        // Idle pause: nothing moves.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(mock.uploads().len(), uploads_at_pause);

        engine.resume(&id).await.unwrap();
        assert!(matches!(
            wait_terminal(&mut events).await,
            TransferEvent::Completed { .. }
        ));
        assert_eq!(session.transferred_bytes(), 10 * 1024);

        // No chunk the remote acknowledged before the pause was sent again.
        let uploads = mock.uploads();
        for index in completed_before {
            assert_eq!(
                uploads.iter().filter(|&&i| i == index).count(),
                1,
                "chunk {index} was re-uploaded after resume"
            );
        }
    }

    #[tokio::test]
    async fn cancel_is_terminal_and_aborts_remote_state() {
        let dir = TempDir::new().unwrap();
        let path = fixture_file(&dir, 10 * 1024);
        let mock = Arc::new(MockRemote::with_delay(Duration::from_millis(25)));
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();
        loop {
            if let TransferEvent::Started { .. } = recv_event(&mut events).await {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        engine.cancel(&id).await.unwrap();

        match wait_terminal(&mut events).await {
            TransferEvent::Cancelled {
                session_id,
                incomplete_chunks,
            } => {
                assert_eq!(session_id, id);
                assert!(!incomplete_chunks.is_empty());
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }

        let session = engine.session(&id).unwrap();
        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert!(mock.state.lock().unwrap().aborted);
        assert!(!mock.state.lock().unwrap().completed);

        // No worker keeps moving bytes after the terminal event.
        let uploads_after_cancel = mock.uploads().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(mock.uploads().len(), uploads_after_cancel);

        // Cancel is irreversible.
        assert!(engine.resume(&id).await.is_err());
    }

    #[tokio::test]
    async fn fatal_chunk_error_fails_the_session() {
        let dir = TempDir::new().unwrap();
        let path = fixture_file(&dir, 10 * 1024);
        let mock = Arc::new(MockRemote::new());
        mock.fail_chunk(3, vec![RemoteError::status(413, "chunk rejected")]);
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();
        match wait_terminal(&mut events).await {
            TransferEvent::Failed {
                session_id,
                error,
                incomplete_chunks,
            } => {
                assert_eq!(session_id, id);
                assert!(error.contains("validation"), "unexpected error: {error}");
                assert!(incomplete_chunks.contains(&3));
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        let session = engine.session(&id).unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(!session.last_error().is_empty());
        assert!(!mock.state.lock().unwrap().completed);
        assert_eq!(engine.aggregate().failed_count, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let dir = TempDir::new().unwrap();
        let path = fixture_file(&dir, 4 * 1024);
        let mock = Arc::new(MockRemote::new());
        mock.fail_chunk(
            1,
            vec![
                RemoteError::status(500, "hiccup"),
                RemoteError::status(409, "ordering conflict"),
            ],
        );
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();
        assert!(matches!(
            wait_terminal(&mut events).await,
            TransferEvent::Completed { .. }
        ));

        let session = engine.session(&id).unwrap();
        assert_eq!(session.transferred_bytes(), 4 * 1024);
        assert_eq!(session.conflict_count(), 1);
        assert_eq!(session.chunk(1).unwrap().attempt, 3);
    }

    #[tokio::test]
    async fn download_happy_path_writes_the_file() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..2500usize).map(|i| (i % 241) as u8).collect();
        let mock = Arc::new(MockRemote::new());
        mock.serve_file("payload.bin", data.clone());
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_download("remote-file-1", dir.path()).unwrap();
        assert!(matches!(
            wait_terminal(&mut events).await,
            TransferEvent::Completed { .. }
        ));

        let session = engine.session(&id).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.file_name(), "payload.bin");
        assert_eq!(session.total_size(), 2500);

        let written = std::fs::read(dir.path().join("payload.bin")).unwrap();
        assert_eq!(written, data);
        assert!(mock.state.lock().unwrap().completed);

        // The manifest carried real digests for all three chunks.
        let manifest = session.manifest();
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest[0].digest, digest_bytes(&data[..1024]));
    }

    #[tokio::test]
    async fn download_rejects_traversal_file_names() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockRemote::new());
        mock.serve_file("../escape.bin", b"evil".to_vec());
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_download("remote-file-1", dir.path()).unwrap();
        match wait_terminal(&mut events).await {
            TransferEvent::Failed { session_id, .. } => assert_eq!(session_id, id),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(
            engine.session(&id).unwrap().status(),
            SessionStatus::Failed
        );
        assert!(!dir.path().join("escape.bin").exists());
    }

    #[tokio::test]
    async fn empty_file_completes_with_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        let mock = Arc::new(MockRemote::new());
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();
        assert!(matches!(
            wait_terminal(&mut events).await,
            TransferEvent::Completed { .. }
        ));
        assert_eq!(engine.session(&id).unwrap().transferred_bytes(), 0);
        assert_eq!(mock.state.lock().unwrap().manifest_len, Some(0));
    }

    #[tokio::test]
    async fn commands_on_unknown_sessions_are_rejected() {
        let mock = Arc::new(MockRemote::new());
        let engine = TransferEngine::new(mock as Arc<dyn RemoteStore>, test_config());
        assert!(matches!(
            engine.pause("nope").await,
            Err(TransferError::SessionNotFound(_))
        ));
        assert!(matches!(
            engine.snapshot("nope"),
            Err(TransferError::SessionNotFound(_))
        ));
        assert!(matches!(
            engine.acknowledge("nope"),
            Err(TransferError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn acknowledge_clears_terminal_sessions_only() {
        let dir = TempDir::new().unwrap();
        let path = fixture_file(&dir, 2 * 1024);
        let mock = Arc::new(MockRemote::with_delay(Duration::from_millis(50)));
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        let id = engine.start_upload(&path).await.unwrap();
        // Still transferring: acknowledge must refuse.
        assert!(engine.acknowledge(&id).is_err());

        assert!(matches!(
            wait_terminal(&mut events).await,
            TransferEvent::Completed { .. }
        ));
        assert_eq!(engine.aggregate().completed_count, 1);

        engine.acknowledge(&id).unwrap();
        assert_eq!(engine.aggregate().completed_count, 0);
        assert!(engine.session(&id).is_none());
        assert!(engine.acknowledge(&id).is_err());
    }

    #[tokio::test]
    async fn aggregate_spans_multiple_sessions() {
        let dir = TempDir::new().unwrap();
        let path_a = fixture_file(&dir, 3 * 1024);
        let path_b = dir.path().join("b.bin");
        std::fs::write(&path_b, vec![7u8; 2048]).unwrap();

        let mock = Arc::new(MockRemote::new());
        let engine = TransferEngine::new(Arc::clone(&mock) as Arc<dyn RemoteStore>, test_config());
        let mut events = engine.take_events().unwrap();

        engine.start_upload(&path_a).await.unwrap();
        engine.start_upload(&path_b).await.unwrap();

        let mut done = 0;
        while done < 2 {
            if let TransferEvent::Completed { .. } = recv_event(&mut events).await {
                done += 1;
            }
        }

        let agg = engine.aggregate();
        assert_eq!(agg.completed_count, 2);
        assert_eq!(agg.active_count, 0);
        assert_eq!(agg.total_bytes, 3 * 1024 + 2048);
        assert_eq!(agg.transferred_bytes, agg.total_bytes);
        assert_eq!(engine.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_fast() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockRemote::new());
        let engine = TransferEngine::new(mock as Arc<dyn RemoteStore>, test_config());
        let result = engine.start_upload(&dir.path().join("missing.bin")).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert_eq!(engine.snapshots().len(), 0);
    }
}
