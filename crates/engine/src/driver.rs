//! Per-session driver task.
//!
//! Exactly one driver runs per session. It owns every mutation of the
//! session's chunk table and status, so no lock is ever held across an
//! await and no two tasks race on transfer state. Workers report chunk
//! outcomes; the engine injects pause/resume/cancel through a command
//! channel; the driver serializes all of it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ferry_protocol::messages::{
    CompleteUploadRequest, InitiateDownloadRequest, InitiateUploadRequest,
};
use ferry_protocol::types::{SessionStatus, TransferDirection};

use crate::chunk::partition;
use crate::engine::TransferEvent;
use crate::error::TransferError;
use crate::limiter::ChunkGate;
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::session::TransferSession;
use crate::validation::validate_remote_name;
use crate::worker::{self, ChunkOutcome, WorkerContext};

/// Control messages from the engine to a running driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Pause,
    Resume,
    Cancel,
}

/// What ended a transfer round.
enum Round {
    /// Every chunk is `Completed`.
    Finished,
    /// A chunk failed fatally; the session is done for.
    Fatal(TransferError),
    /// A pause was requested and all workers have stood down.
    Pause,
    /// A cancel was requested and all workers have stood down.
    Cancel,
}

pub(crate) struct SessionDriver {
    ctx: DriverCtx,
    commands: mpsc::Receiver<SessionCommand>,
}

struct DriverCtx {
    session: Arc<TransferSession>,
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    /// Remote file ID: the requested ID for downloads, filled in from the
    /// completion response for uploads.
    file_id: String,
    /// The file actually read or written. For downloads this starts as
    /// the destination directory and is resolved to a full path once the
    /// remote reports the file name.
    data_path: PathBuf,
    events: mpsc::Sender<TransferEvent>,
}

impl SessionDriver {
    pub(crate) fn new(
        session: Arc<TransferSession>,
        remote: Arc<dyn RemoteStore>,
        retry: RetryPolicy,
        file_id: String,
        events: mpsc::Sender<TransferEvent>,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let data_path = session.local_path().to_path_buf();
        Self {
            ctx: DriverCtx {
                session,
                remote,
                retry,
                file_id,
                data_path,
                events,
            },
            commands,
        }
    }

    /// Drives the session to a terminal status. Runs as its own task.
    pub(crate) async fn run(self) {
        let Self {
            mut ctx,
            mut commands,
        } = self;

        match ctx.initiate(&mut commands).await {
            Ok(true) => {}
            Ok(false) => {
                // Cancelled before any chunk moved.
                ctx.cancel().await;
                return;
            }
            Err(e) => {
                ctx.fail(e).await;
                return;
            }
        }

        if let Err(e) = ctx.session.try_transition(SessionStatus::Transferring) {
            ctx.fail(e).await;
            return;
        }
        info!(
            session = %ctx.session.id(),
            direction = %ctx.session.direction(),
            file = %ctx.session.file_name(),
            bytes = ctx.session.total_size(),
            chunks = ctx.session.chunk_count(),
            "transfer started"
        );
        ctx.emit(TransferEvent::Started {
            session_id: ctx.session.id().to_string(),
        })
        .await;

        loop {
            match ctx.transfer_round(&mut commands).await {
                Round::Finished => {
                    ctx.finalize().await;
                    return;
                }
                Round::Fatal(e) => {
                    ctx.fail(e).await;
                    return;
                }
                Round::Cancel => {
                    ctx.cancel().await;
                    return;
                }
                Round::Pause => {
                    if !ctx.hold_paused(&mut commands).await {
                        ctx.cancel().await;
                        return;
                    }
                    // Resumed: next round picks up the pending set.
                }
            }
        }
    }
}

impl DriverCtx {
    /// Sets up the chunk table and registers the session with the remote.
    /// Returns `Ok(false)` if a cancel arrived before setup finished.
    async fn initiate(
        &mut self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<bool, TransferError> {
        match self.session.direction() {
            TransferDirection::Upload => {
                let total = self.session.total_size();
                let chunks = partition(total, self.session.chunk_size())?;
                let total_chunks = chunks.len();
                self.session.install_chunks(chunks);

                let req = InitiateUploadRequest {
                    file_name: self.session.file_name(),
                    file_size: total,
                    total_chunks,
                    chunk_size: self.session.chunk_size(),
                };
                let remote = Arc::clone(&self.remote);
                let resp = tokio::select! {
                    r = remote.initiate_upload(&req) => r.map_err(TransferError::remote)?,
                    _ = recv_cancel(commands) => return Ok(false),
                };
                self.session.set_remote_session(&resp.session_id);
            }
            TransferDirection::Download => {
                let req = InitiateDownloadRequest {
                    remote_id: self.file_id.clone(),
                };
                let remote = Arc::clone(&self.remote);
                let resp = tokio::select! {
                    r = remote.initiate_download(&req) => r.map_err(TransferError::remote)?,
                    _ = recv_cancel(commands) => return Ok(false),
                };
                validate_remote_name(&resp.file_name)?;
                self.session.set_remote_info(&resp.file_name, resp.file_size);
                self.session.set_remote_session(&resp.session_id);
                self.data_path = self.session.local_path().join(&resp.file_name);

                let chunks = partition(resp.file_size, self.session.chunk_size())?;
                self.session.install_chunks(chunks);
            }
        }
        Ok(true)
    }

    /// Runs workers for every pending chunk until the set drains, a chunk
    /// fails fatally, or a pause/cancel command lands.
    async fn transfer_round(&self, commands: &mut mpsc::Receiver<SessionCommand>) -> Round {
        let pending = self.session.pending_indices();
        if pending.is_empty() {
            return if self.session.all_completed() {
                Round::Finished
            } else {
                Round::Fatal(TransferError::InvalidInput(
                    "no pending chunks but transfer is incomplete".into(),
                ))
            };
        }

        let halt = CancellationToken::new();
        let worker_ctx = Arc::new(WorkerContext {
            remote: Arc::clone(&self.remote),
            direction: self.session.direction(),
            remote_session_id: self.session.remote_session_id(),
            local_path: self.data_path.clone(),
            retry: self.retry.clone(),
            gate: ChunkGate::new(self.session.total_size(), self.session.chunk_count()),
            halt: halt.clone(),
        });

        // All pending chunks are queued at once; the gate bounds how many
        // are actually on the wire.
        let mut workers = JoinSet::new();
        for index in pending {
            let chunk = match self.session.chunk(index) {
                Some(c) => c,
                None => continue,
            };
            self.session.mark_in_flight(index);
            workers.spawn(worker::run_chunk(Arc::clone(&worker_ctx), chunk));
        }

        let mut fatal: Option<TransferError> = None;
        let mut stop: Option<SessionCommand> = None;

        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => {
                            if let Some(err) = self.apply_outcome(outcome).await {
                                if fatal.is_none() {
                                    fatal = Some(err);
                                    halt.cancel();
                                }
                            }
                        }
                        Some(Err(join_err)) => {
                            error!(session = %self.session.id(), error = %join_err, "chunk worker aborted");
                            if fatal.is_none() {
                                fatal = Some(TransferError::InvalidInput(format!(
                                    "chunk worker aborted: {join_err}"
                                )));
                                halt.cancel();
                            }
                        }
                        None => break,
                    }
                }
                cmd = commands.recv(), if stop.is_none() && fatal.is_none() => {
                    match cmd {
                        Some(SessionCommand::Pause) => {
                            stop = Some(SessionCommand::Pause);
                            halt.cancel();
                        }
                        // A closed channel means the engine is gone; treat
                        // it as a cancel so the task winds down.
                        Some(SessionCommand::Cancel) | None => {
                            stop = Some(SessionCommand::Cancel);
                            halt.cancel();
                        }
                        Some(SessionCommand::Resume) => {
                            debug!(session = %self.session.id(), "resume ignored, session not paused");
                        }
                    }
                }
            }
        }

        if let Some(err) = fatal {
            return Round::Fatal(err);
        }
        match stop {
            Some(SessionCommand::Pause) => Round::Pause,
            Some(_) => Round::Cancel,
            None => {
                if self.session.all_completed() {
                    Round::Finished
                } else {
                    Round::Fatal(TransferError::InvalidInput(
                        "workers drained with chunks incomplete".into(),
                    ))
                }
            }
        }
    }

    /// Applies one worker outcome to the chunk table. Returns the fatal
    /// error when the chunk failed for good.
    async fn apply_outcome(&self, outcome: ChunkOutcome) -> Option<TransferError> {
        match outcome {
            ChunkOutcome::Completed {
                index,
                attempt,
                duration,
                digest,
                conflicts,
            } => {
                self.session.record_completed(index, attempt, duration, &digest);
                if conflicts > 0 {
                    self.session.add_conflicts(conflicts);
                }
                self.emit(TransferEvent::ChunkCompleted {
                    session_id: self.session.id().to_string(),
                    index,
                    transferred_bytes: self.session.transferred_bytes(),
                })
                .await;
                None
            }
            ChunkOutcome::Interrupted {
                index,
                digest,
                conflicts,
            } => {
                if let Some(d) = digest {
                    self.session.cache_digest(index, &d);
                }
                self.session.return_pending(index);
                if conflicts > 0 {
                    self.session.add_conflicts(conflicts);
                }
                None
            }
            ChunkOutcome::Failed {
                index,
                attempt,
                error,
                conflicts,
            } => {
                self.session.record_failed(index, attempt);
                if conflicts > 0 {
                    self.session.add_conflicts(conflicts);
                }
                Some(error)
            }
        }
    }

    /// Parks the session in `Paused` until a resume or cancel arrives.
    /// Returns false when the session should be cancelled instead.
    async fn hold_paused(&self, commands: &mut mpsc::Receiver<SessionCommand>) -> bool {
        if let Err(e) = self.session.try_transition(SessionStatus::Paused) {
            warn!(session = %self.session.id(), error = %e, "pause rejected");
            return true;
        }

        let rid = self.session.remote_session_id();
        if let Err(e) = self
            .remote
            .pause_session(self.session.direction(), &rid)
            .await
        {
            // Best effort: the local pause stands either way.
            warn!(session = %self.session.id(), error = %e, "remote pause notification failed");
        }
        info!(session = %self.session.id(), "transfer paused");
        self.emit(TransferEvent::Paused {
            session_id: self.session.id().to_string(),
        })
        .await;

        loop {
            match commands.recv().await {
                Some(SessionCommand::Resume) => {
                    // The remote's missing set is authoritative; anything
                    // it already holds is not re-sent.
                    match self.remote.resume_session(self.session.direction(), &rid).await {
                        Ok(resp) => self.session.apply_remote_missing(&resp.missing_chunks),
                        Err(e) => {
                            warn!(
                                session = %self.session.id(),
                                error = %e,
                                "resume reconciliation failed, keeping local chunk table"
                            );
                        }
                    }
                    if let Err(e) = self.session.try_transition(SessionStatus::Transferring) {
                        warn!(session = %self.session.id(), error = %e, "resume rejected");
                        return false;
                    }
                    info!(
                        session = %self.session.id(),
                        remaining = self.session.pending_indices().len(),
                        "transfer resumed"
                    );
                    self.emit(TransferEvent::Resumed {
                        session_id: self.session.id().to_string(),
                    })
                    .await;
                    return true;
                }
                Some(SessionCommand::Cancel) | None => return false,
                Some(SessionCommand::Pause) => {
                    debug!(session = %self.session.id(), "pause ignored, already paused");
                }
            }
        }
    }

    /// Final handshake: sends the chunk manifest so the remote can verify
    /// and assemble, then lands the session in `Completed`.
    async fn finalize(&self) {
        if let Err(e) = self.session.try_transition(SessionStatus::Completing) {
            self.fail(e).await;
            return;
        }

        let rid = self.session.remote_session_id();
        let req = CompleteUploadRequest {
            chunks: self.session.manifest(),
        };
        let result = match self.session.direction() {
            TransferDirection::Upload => self
                .remote
                .complete_upload(&rid, &req)
                .await
                .map(|meta| meta.remote_id),
            TransferDirection::Download => self
                .remote
                .confirm_download(&rid, &req)
                .await
                .map(|_| self.file_id.clone()),
        };

        match result {
            Ok(remote_id) => {
                if let Err(e) = self.session.try_transition(SessionStatus::Completed) {
                    self.fail(e).await;
                    return;
                }
                info!(
                    session = %self.session.id(),
                    file = %self.session.file_name(),
                    bytes = self.session.transferred_bytes(),
                    "transfer completed"
                );
                self.emit(TransferEvent::Completed {
                    session_id: self.session.id().to_string(),
                    remote_id,
                })
                .await;
            }
            Err(e) => self.fail(TransferError::remote(e)).await,
        }
    }

    /// Lands the session in `Failed` and reports which chunks never made
    /// it, so a caller can start a fresh session that skips them.
    async fn fail(&self, error: TransferError) {
        error!(session = %self.session.id(), error = %error, "transfer failed");
        self.session.set_last_error(&error.to_string());
        if let Err(e) = self.session.try_transition(SessionStatus::Failed) {
            warn!(session = %self.session.id(), error = %e, "failure transition rejected");
        }
        self.emit(TransferEvent::Failed {
            session_id: self.session.id().to_string(),
            error: error.to_string(),
            incomplete_chunks: self.session.incomplete_indices(),
        })
        .await;
    }

    /// Lands the session in `Cancelled`, discarding remote state best
    /// effort. No partially transferred chunk survives as `Completed`
    /// on our side unless the remote acknowledged it earlier.
    async fn cancel(&self) {
        if self
            .session
            .try_transition(SessionStatus::Cancelling)
            .is_err()
        {
            return;
        }
        let rid = self.session.remote_session_id();
        if !rid.is_empty() {
            if let Err(e) = self
                .remote
                .abort_session(self.session.direction(), &rid)
                .await
            {
                warn!(session = %self.session.id(), error = %e, "remote abort failed");
            }
        }
        if let Err(e) = self.session.try_transition(SessionStatus::Cancelled) {
            warn!(session = %self.session.id(), error = %e, "cancel transition rejected");
            return;
        }
        info!(session = %self.session.id(), "transfer cancelled");
        self.emit(TransferEvent::Cancelled {
            session_id: self.session.id().to_string(),
            incomplete_chunks: self.session.incomplete_indices(),
        })
        .await;
    }

    async fn emit(&self, event: TransferEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event).await;
    }
}

/// Resolves when a cancel is requested (or the engine goes away).
/// Pause and resume make no sense before the transfer loop starts and
/// are dropped with a log line.
async fn recv_cancel(commands: &mut mpsc::Receiver<SessionCommand>) {
    loop {
        match commands.recv().await {
            Some(SessionCommand::Cancel) | None => return,
            Some(cmd) => {
                debug!(?cmd, "command ignored while initiating");
            }
        }
    }
}
