//! The transfer engine.
//!
//! Owns the selected file, its metadata, and the pending chunk queue, and
//! drains the queue one chunk at a time. Intents (`start`, `pause`,
//! `resume`, `cancel`, `refresh_status`) may be issued from any task; the
//! engine is meant to be shared as `Arc<TransferEngine>`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use chunkup_client::{ChunkUpload, ClientError, Credential, ProgressFn, Session, UploadApi};
use chunkup_protocol::{ChunkAck, FileMetadata, FileStatus};
use chunkup_transfer::{
    ChunkRange, ChunkSource, SpeedCalculator, TransferError, pending_chunks, plan_chunks,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EngineState, Selection, TransferProgress, UploadOutcome};
use crate::reconcile::{StatusReconciler, merge};
use crate::retry::{RetryError, send_with_retry};
use crate::store::{TransferState, TransferStore, transfer_key};

/// Generates an upload id: `file-<unix millis>-<6 random characters>`.
pub fn generate_file_id() -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("file-{}-{}", Utc::now().timestamp_millis(), &entropy[..6])
}

/// The selected file and everything known about its upload.
struct Selected {
    source: Arc<dyn ChunkSource>,
    key: String,
    file_id: String,
    metadata: FileMetadata,
    queue: VecDeque<ChunkRange>,
    /// The service knows this `file_id`; begin transfer is skipped.
    registered: bool,
}

struct Inner {
    state: EngineState,
    selected: Option<Selected>,
    running: bool,
    pause_requested: bool,
    cancel_requested: bool,
    /// Token of the in-flight chunk.
    chunk_cancel: Option<CancellationToken>,
    retry_attempt: u32,
    last_error: Option<String>,
}

/// Clears the running flag when an upload run ends.
struct RunGuard<'a> {
    inner: &'a Mutex<Inner>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.running = false;
        }
    }
}

/// Resumable, sequential chunk uploader.
pub struct TransferEngine {
    api: Arc<dyn UploadApi>,
    store: Arc<dyn TransferStore>,
    reconciler: StatusReconciler,
    config: EngineConfig,
    inner: Mutex<Inner>,
    speed: Arc<SpeedCalculator>,
    /// High-water mark of file bytes handed to the transport this run.
    sent_bytes: Arc<AtomicU64>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
}

impl TransferEngine {
    pub fn new(
        api: Arc<dyn UploadApi>,
        store: Arc<dyn TransferStore>,
        config: EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            reconciler: StatusReconciler::new(Arc::clone(&api)),
            api,
            store,
            config,
            inner: Mutex::new(Inner {
                state: EngineState::Idle,
                selected: None,
                running: false,
                pause_requested: false,
                cancel_requested: false,
                chunk_cancel: None,
                retry_attempt: 0,
                last_error: None,
            }),
            speed: Arc::new(SpeedCalculator::default()),
            sent_bytes: Arc::new(AtomicU64::new(0)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    /// Selects the file to upload, offering resume if a `partial`
    /// checkpoint exists for it.
    pub fn select_file(&self, source: Arc<dyn ChunkSource>) -> Result<Selection, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            return Err(EngineError::Busy);
        }

        let total = source.len();
        let key = transfer_key(source.name(), total);
        let checkpoint = self.store.load(&key).filter(|record| {
            record.is_resumable()
                && record.metadata.total_bytes == total
                && record.metadata.is_consistent()
        });

        let (selected, selection) = match checkpoint {
            Some(record) => {
                let next = record.metadata.next_expected_byte;
                let queue = pending_chunks(total, self.config.chunk_size, next)?;
                info!(file_id = %record.file_id, next_expected_byte = next, "checkpoint found");
                let selected = Selected {
                    source,
                    key,
                    file_id: record.file_id,
                    metadata: record.metadata.clone(),
                    queue: queue.into(),
                    registered: true,
                };
                (selected, Selection::ResumeAvailable(record.metadata))
            }
            None => {
                let file_id = generate_file_id();
                let metadata = FileMetadata::not_uploaded(&file_id, total);
                debug!(file_id = %file_id, total_bytes = total, "file selected");
                let selected = Selected {
                    source,
                    key,
                    file_id,
                    metadata: metadata.clone(),
                    queue: VecDeque::new(),
                    registered: false,
                };
                (selected, Selection::Fresh(metadata))
            }
        };

        inner.selected = Some(selected);
        inner.retry_attempt = 0;
        inner.last_error = None;
        self.sent_bytes
            .store(selection.metadata().received_bytes, Ordering::Relaxed);
        self.speed.reset();
        self.set_state(&mut inner, EngineState::Idle);
        self.emit(EngineEvent::MetadataUpdated(selection.metadata().clone()));
        Ok(selection)
    }

    /// Declines the resume offer: drops the checkpoint and starts over with a
    /// new `file_id`.
    pub fn start_new(&self) -> Result<FileMetadata, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            return Err(EngineError::Busy);
        }
        let Some(sel) = inner.selected.as_mut() else {
            return Err(EngineError::NoFileSelected);
        };

        self.discard_target(sel);
        let metadata = sel.metadata.clone();
        info!(file_id = %sel.file_id, "starting over");

        inner.retry_attempt = 0;
        inner.last_error = None;
        self.sent_bytes.store(0, Ordering::Relaxed);
        self.set_state(&mut inner, EngineState::Idle);
        self.emit(EngineEvent::MetadataUpdated(metadata.clone()));
        Ok(metadata)
    }

    /// Uploads the selected file.
    ///
    /// Registers the upload first unless a checkpoint is being continued.
    pub async fn start(&self, session: &Session) -> Result<UploadOutcome, EngineError> {
        let credential = session
            .credential()
            .ok_or(EngineError::MissingCredentials)?;

        let (_run, begin) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.running {
                return Err(EngineError::Busy);
            }
            let state = inner.state;
            let (registered, file_id, total) = match inner.selected.as_ref() {
                Some(sel) => (sel.registered, sel.file_id.clone(), sel.source.len()),
                None => return Err(EngineError::NoFileSelected),
            };
            if state != EngineState::Idle {
                return Err(EngineError::InvalidState {
                    action: "start",
                    state,
                });
            }

            let run = self.begin_run(&mut inner);
            let begin = (!registered).then_some((file_id, total));
            self.set_state(&mut inner, initial_state(&begin));
            (run, begin)
        };

        self.run(credential, begin).await
    }

    /// Continues a paused or failed upload from the head of its queue.
    pub async fn resume(&self, session: &Session) -> Result<UploadOutcome, EngineError> {
        let credential = session
            .credential()
            .ok_or(EngineError::MissingCredentials)?;

        let (_run, begin) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.running {
                return Err(EngineError::Busy);
            }
            let state = inner.state;
            let chunk_size = self.config.chunk_size;
            let Some(sel) = inner.selected.as_mut() else {
                return Err(EngineError::NoFileSelected);
            };

            let resumable = matches!(state, EngineState::Paused | EngineState::Failed)
                || (state == EngineState::Idle && sel.registered);
            if !resumable {
                return Err(EngineError::InvalidState {
                    action: "resume",
                    state,
                });
            }

            let begin = if sel.registered {
                if sel.queue.is_empty() {
                    let next = sel.metadata.next_expected_byte;
                    sel.queue = pending_chunks(sel.source.len(), chunk_size, next)?.into();
                }
                None
            } else {
                // Registration never succeeded; there is nothing to continue.
                Some((sel.file_id.clone(), sel.source.len()))
            };
            info!(
                file_id = %sel.file_id,
                next_expected_byte = sel.metadata.next_expected_byte,
                "resuming upload"
            );

            let run = self.begin_run(&mut inner);
            self.set_state(&mut inner, initial_state(&begin));
            (run, begin)
        };

        self.run(credential, begin).await
    }

    /// Stops after the in-flight chunk is cancelled and persists a
    /// checkpoint. Returns the checkpointed metadata.
    pub fn pause(&self) -> Result<FileMetadata, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != EngineState::Uploading {
            return Err(EngineError::InvalidState {
                action: "pause",
                state: inner.state,
            });
        }

        inner.pause_requested = true;
        if let Some(token) = inner.chunk_cancel.take() {
            token.cancel();
        }
        let Some(sel) = inner.selected.as_mut() else {
            return Err(EngineError::NoFileSelected);
        };

        self.checkpoint(sel);
        let metadata = sel.metadata.clone();
        info!(
            file_id = %sel.file_id,
            next_expected_byte = metadata.next_expected_byte,
            "upload paused"
        );
        self.set_state(&mut inner, EngineState::Paused);
        Ok(metadata)
    }

    /// Aborts the upload and forgets it. The file stays selected with a new
    /// `file_id`.
    pub fn cancel(&self) -> Result<FileMetadata, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            inner.cancel_requested = true;
        }
        if let Some(token) = inner.chunk_cancel.take() {
            token.cancel();
        }
        let Some(sel) = inner.selected.as_mut() else {
            return Err(EngineError::NoFileSelected);
        };

        info!(file_id = %sel.file_id, "upload cancelled");
        self.discard_target(sel);
        let metadata = sel.metadata.clone();

        inner.retry_attempt = 0;
        inner.last_error = None;
        self.sent_bytes.store(0, Ordering::Relaxed);
        self.speed.reset();
        self.set_state(&mut inner, EngineState::Idle);
        self.emit(EngineEvent::MetadataUpdated(metadata.clone()));
        Ok(metadata)
    }

    /// Deselects the file. Any checkpoint is kept for a later session.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            inner.cancel_requested = true;
        }
        if let Some(token) = inner.chunk_cancel.take() {
            token.cancel();
        }
        inner.selected = None;
        inner.retry_attempt = 0;
        inner.last_error = None;
        self.sent_bytes.store(0, Ordering::Relaxed);
        self.speed.reset();
        self.set_state(&mut inner, EngineState::Idle);
        debug!("engine reset");
    }

    /// Replaces local metadata with the service's record.
    pub async fn refresh_status(&self, session: &Session) -> Result<FileMetadata, EngineError> {
        let (file_id, total) = {
            let inner = self.inner.lock().unwrap();
            match inner.selected.as_ref() {
                Some(sel) => (sel.file_id.clone(), sel.source.len()),
                None => return Err(EngineError::NoFileSelected),
            }
        };

        let result = self.reconciler.query(session, &file_id, Some(total)).await;

        let mut inner = self.inner.lock().unwrap();
        let remote = match result {
            Ok(metadata) => metadata,
            Err(ClientError::Unauthorized(message)) => {
                warn!(file_id = %file_id, "status query rejected, session expired");
                inner.last_error = Some(message.clone());
                self.emit(EngineEvent::SessionInvalidated);
                return Err(EngineError::Unauthorized(message));
            }
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "status query failed");
                inner.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let active = inner.running && inner.state.is_active();
        let state = inner.state;
        let chunk_size = self.config.chunk_size;
        let Some(sel) = inner
            .selected
            .as_mut()
            .filter(|sel| sel.file_id == file_id)
        else {
            // Selection changed while the query was in flight.
            return Ok(remote);
        };
        if active && !session.is_authenticated() {
            return Ok(remote);
        }

        sel.metadata = merge(&sel.metadata, remote, active);
        let metadata = sel.metadata.clone();
        let mut completed = false;
        if !active {
            match metadata.status {
                FileStatus::Complete => {
                    sel.queue.clear();
                    self.clear_checkpoint(sel);
                    completed = true;
                }
                FileStatus::NotUploaded | FileStatus::NotFound => {
                    sel.queue.clear();
                    sel.registered = false;
                }
                FileStatus::Partial | FileStatus::Pending => {
                    if sel.registered
                        && let Ok(queue) =
                            pending_chunks(total, chunk_size, metadata.next_expected_byte)
                    {
                        sel.queue = queue.into();
                    }
                }
            }
        }
        debug!(file_id = %file_id, status = %metadata.status, active, "status reconciled");

        self.emit(EngineEvent::MetadataUpdated(metadata.clone()));
        if completed && state != EngineState::Completed {
            self.set_state(&mut inner, EngineState::Completed);
        }
        Ok(metadata)
    }

    /// Saves the uploaded file to `dest`. Only valid once it is `complete`.
    pub async fn download(&self, dest: &Path) -> Result<u64, EngineError> {
        let file_id = {
            let inner = self.inner.lock().unwrap();
            let Some(sel) = inner.selected.as_ref() else {
                return Err(EngineError::NoFileSelected);
            };
            if sel.metadata.status != FileStatus::Complete {
                return Err(EngineError::NotComplete {
                    status: sel.metadata.status,
                });
            }
            sel.file_id.clone()
        };

        let bytes = self.api.fetch_file(&file_id, dest).await?;
        info!(file_id = %file_id, bytes, dest = %dest.display(), "download saved");
        Ok(bytes)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> EngineState {
        self.inner.lock().unwrap().state
    }

    pub fn metadata(&self) -> Option<FileMetadata> {
        let inner = self.inner.lock().unwrap();
        inner.selected.as_ref().map(|sel| sel.metadata.clone())
    }

    pub fn file_id(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.selected.as_ref().map(|sel| sel.file_id.clone())
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// Attempt number of the chunk being retried; `0` when not retrying.
    pub fn retry_attempt(&self) -> u32 {
        self.inner.lock().unwrap().retry_attempt
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    pub fn progress(&self) -> TransferProgress {
        let total = {
            let inner = self.inner.lock().unwrap();
            inner.selected.as_ref().map_or(0, |sel| sel.source.len())
        };
        let sent = self.sent_bytes.load(Ordering::Relaxed).min(total);
        TransferProgress {
            sent_bytes: sent,
            total_bytes: total,
            bytes_per_second: self.speed.bytes_per_second(),
            eta: self.speed.eta(total - sent),
        }
    }

    // -----------------------------------------------------------------------
    // Upload run
    // -----------------------------------------------------------------------

    fn begin_run(&self, inner: &mut Inner) -> RunGuard<'_> {
        inner.running = true;
        inner.pause_requested = false;
        inner.cancel_requested = false;
        inner.retry_attempt = 0;
        inner.last_error = None;

        let received = inner
            .selected
            .as_ref()
            .map_or(0, |sel| sel.metadata.received_bytes);
        self.sent_bytes.store(received, Ordering::Relaxed);
        self.speed.reset();

        RunGuard { inner: &self.inner }
    }

    async fn run(
        &self,
        credential: &Credential,
        begin: Option<(String, u64)>,
    ) -> Result<UploadOutcome, EngineError> {
        if let Some((file_id, total)) = begin
            && let Some(outcome) = self.initialize(credential, &file_id, total).await?
        {
            return Ok(outcome);
        }
        self.drain(credential).await
    }

    /// Registers the upload and plans its queue. Returns an outcome if the
    /// run ended here.
    async fn initialize(
        &self,
        credential: &Credential,
        file_id: &str,
        total: u64,
    ) -> Result<Option<UploadOutcome>, EngineError> {
        if total == 0 {
            // Nothing to send; the service rejects empty uploads.
            let mut inner = self.inner.lock().unwrap();
            return Ok(Some(self.complete(&mut inner)));
        }

        let plan = match plan_chunks(total, self.config.chunk_size) {
            Ok(plan) => plan,
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                self.fail(&mut inner, e.to_string(), false);
                return Err(e.into());
            }
        };

        info!(file_id, total_bytes = total, chunks = plan.len(), "initializing upload");
        let result = self.api.begin_transfer(credential, file_id, total).await;

        let mut inner = self.inner.lock().unwrap();
        if inner.cancel_requested {
            return Ok(Some(UploadOutcome::Cancelled));
        }

        match result {
            Ok(metadata) => {
                if let Some(sel) = inner.selected.as_mut() {
                    self.sent_bytes
                        .fetch_max(metadata.received_bytes, Ordering::Relaxed);
                    sel.metadata = metadata;
                    sel.queue = plan.into();
                    sel.registered = true;
                    self.emit(EngineEvent::MetadataUpdated(sel.metadata.clone()));
                }
                self.set_state(&mut inner, EngineState::Uploading);
                Ok(None)
            }
            Err(ClientError::Unauthorized(message)) => {
                self.fail(&mut inner, message.clone(), false);
                self.emit(EngineEvent::SessionInvalidated);
                Err(EngineError::Unauthorized(message))
            }
            Err(e) => {
                let err = EngineError::Initialize(e);
                self.fail(&mut inner, err.to_string(), false);
                Err(err)
            }
        }
    }

    /// Sends queued chunks in order until the queue is empty or the run is
    /// interrupted.
    async fn drain(&self, credential: &Credential) -> Result<UploadOutcome, EngineError> {
        let policy = self.config.retry_policy();

        loop {
            let (range, token, source, file_id) = {
                let mut inner = self.inner.lock().unwrap();
                if let Some(outcome) = interrupted(&inner) {
                    return Ok(outcome);
                }
                let Some(sel) = inner.selected.as_mut() else {
                    return Ok(UploadOutcome::Cancelled);
                };
                let Some(&queued) = sel.queue.front() else {
                    break;
                };

                let next = sel.metadata.next_expected_byte;
                if queued.end <= next {
                    sel.queue.pop_front();
                    debug!(file_id = %sel.file_id, range = %queued, "chunk already accepted, skipping");
                    self.emit(EngineEvent::ChunkSkipped { range: queued });
                    continue;
                }
                // The service holds a prefix of this range; send the rest.
                let range = if queued.start < next {
                    let rest = ChunkRange::new(next, queued.end);
                    debug!(file_id = %sel.file_id, range = %rest, "sending remainder of partly accepted chunk");
                    if let Some(front) = sel.queue.front_mut() {
                        *front = rest;
                    }
                    rest
                } else {
                    queued
                };

                let source = Arc::clone(&sel.source);
                let file_id = sel.file_id.clone();
                let token = CancellationToken::new();
                inner.chunk_cancel = Some(token.clone());
                (range, token, source, file_id)
            };

            let name = source.name().to_string();
            let total = source.len();
            let data = match read_chunk(source, range).await {
                Ok(data) => Bytes::from(data),
                Err(e) => {
                    let mut inner = self.inner.lock().unwrap();
                    inner.chunk_cancel = None;
                    if let Some(outcome) = interrupted(&inner) {
                        return Ok(outcome);
                    }
                    self.fail(&mut inner, e.to_string(), true);
                    return Err(e.into());
                }
            };

            let api = self.api.as_ref();
            let result = send_with_retry(
                &policy,
                &token,
                |_| {
                    let chunk = ChunkUpload {
                        file_id: file_id.clone(),
                        file_name: name.clone(),
                        range,
                        total_bytes: total,
                        data: data.clone(),
                    };
                    api.upload_chunk(
                        credential,
                        chunk,
                        self.progress_reporter(range, total),
                        token.clone(),
                    )
                },
                |attempt, delay, error| {
                    self.inner.lock().unwrap().retry_attempt = attempt;
                    self.emit(EngineEvent::Retrying {
                        attempt,
                        max_attempts: policy.max_attempts,
                        delay,
                        error: error.to_string(),
                    });
                },
            )
            .await;

            let mut inner = self.inner.lock().unwrap();
            inner.chunk_cancel = None;
            if let Some(outcome) = interrupted(&inner) {
                // A pause or cancel owns the state now; an ack that raced it
                // is not committed.
                return Ok(outcome);
            }

            match result {
                Ok(ack) => self.commit(&mut inner, range, &ack),
                Err(RetryError { source, .. }) if source.is_cancelled() => {
                    let Some(sel) = inner.selected.as_mut() else {
                        return Ok(UploadOutcome::Cancelled);
                    };
                    self.checkpoint(sel);
                    let metadata = sel.metadata.clone();
                    self.set_state(&mut inner, EngineState::Paused);
                    return Ok(UploadOutcome::Paused(metadata));
                }
                Err(RetryError {
                    source: ClientError::Unauthorized(message),
                    ..
                }) => {
                    self.fail(&mut inner, message.clone(), true);
                    self.emit(EngineEvent::SessionInvalidated);
                    return Err(EngineError::Unauthorized(message));
                }
                Err(RetryError { attempts, source }) => {
                    let err = EngineError::RetriesExhausted {
                        start: range.start,
                        end: range.end,
                        attempts,
                        source,
                    };
                    self.fail(&mut inner, err.to_string(), true);
                    return Err(err);
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(outcome) = interrupted(&inner) {
            return Ok(outcome);
        }
        let (received, total) = match inner.selected.as_ref() {
            Some(sel) => (sel.metadata.received_bytes, sel.source.len()),
            None => return Ok(UploadOutcome::Cancelled),
        };
        if received >= total {
            Ok(self.complete(&mut inner))
        } else {
            let err = EngineError::Incomplete { received, total };
            self.fail(&mut inner, err.to_string(), true);
            Err(err)
        }
    }

    /// Applies an acknowledged chunk.
    fn commit(&self, inner: &mut Inner, range: ChunkRange, ack: &ChunkAck) {
        inner.retry_attempt = 0;
        let Some(sel) = inner.selected.as_mut() else {
            return;
        };

        let meta = &mut sel.metadata;
        meta.received_bytes = meta.received_bytes.max(range.end);
        meta.next_expected_byte = meta.next_expected_byte.max(range.end);
        meta.status = FileStatus::Partial;
        meta.touch();
        if sel.queue.front() == Some(&range) {
            sel.queue.pop_front();
        }
        self.sent_bytes.fetch_max(range.end, Ordering::Relaxed);

        debug!(
            file_id = %sel.file_id,
            range = %range,
            duplicate = ack.is_duplicate(),
            "chunk acknowledged"
        );
        self.emit(EngineEvent::ChunkAcknowledged {
            range,
            duplicate: ack.is_duplicate(),
        });
        self.emit(EngineEvent::MetadataUpdated(sel.metadata.clone()));
    }

    fn complete(&self, inner: &mut Inner) -> UploadOutcome {
        inner.retry_attempt = 0;
        let Some(sel) = inner.selected.as_mut() else {
            return UploadOutcome::Cancelled;
        };

        let total = sel.source.len();
        sel.metadata.status = FileStatus::Complete;
        sel.metadata.next_expected_byte = total;
        sel.metadata.touch();
        sel.queue.clear();
        self.clear_checkpoint(sel);

        let metadata = sel.metadata.clone();
        info!(file_id = %sel.file_id, total_bytes = total, "upload completed");
        self.set_state(inner, EngineState::Completed);
        self.emit(EngineEvent::MetadataUpdated(metadata.clone()));
        self.emit(EngineEvent::Completed(metadata.clone()));
        UploadOutcome::Completed(metadata)
    }

    fn fail(&self, inner: &mut Inner, message: String, checkpoint: bool) {
        error!(error = %message, "upload failed");
        if checkpoint && let Some(sel) = inner.selected.as_mut() {
            self.checkpoint(sel);
        }
        inner.last_error = Some(message.clone());
        self.set_state(inner, EngineState::Failed);
        self.emit(EngineEvent::Failed { error: message });
    }

    /// Reports file-level progress for one send attempt of `range`.
    fn progress_reporter(&self, range: ChunkRange, total_bytes: u64) -> ProgressFn {
        let speed = Arc::clone(&self.speed);
        let high_water = Arc::clone(&self.sent_bytes);
        let events = self.events_tx.clone();
        let chunk_sent = AtomicU64::new(0);

        Arc::new(move |sent| {
            let previous = chunk_sent.fetch_max(sent, Ordering::Relaxed);
            if sent <= previous {
                return;
            }
            speed.add_sample(sent - previous);

            let file_sent = (range.start + sent).min(total_bytes);
            if high_water.fetch_max(file_sent, Ordering::Relaxed) > file_sent {
                return;
            }
            let event = EngineEvent::Progress {
                sent_bytes: file_sent,
                total_bytes,
                bytes_per_second: speed.bytes_per_second(),
                eta: speed.eta(total_bytes - file_sent),
            };
            if let Err(e) = events.try_send(event) {
                trace!(error = %e, "progress event dropped");
            }
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn checkpoint(&self, sel: &mut Selected) {
        if matches!(
            sel.metadata.status,
            FileStatus::Pending | FileStatus::NotUploaded | FileStatus::NotFound
        ) {
            sel.metadata.status = FileStatus::Partial;
        }
        sel.metadata.touch();

        let record = TransferState {
            file_id: sel.file_id.clone(),
            metadata: sel.metadata.clone(),
        };
        match self.store.save(&sel.key, &record) {
            Ok(()) => debug!(
                file_id = %sel.file_id,
                next_expected_byte = sel.metadata.next_expected_byte,
                "checkpoint saved"
            ),
            Err(e) => warn!(key = %sel.key, error = %e, "failed to save checkpoint"),
        }
    }

    fn clear_checkpoint(&self, sel: &Selected) {
        if let Err(e) = self.store.clear(&sel.key) {
            warn!(key = %sel.key, error = %e, "failed to clear checkpoint");
        }
    }

    /// Forgets the upload of the selected file and assigns a new `file_id`.
    fn discard_target(&self, sel: &mut Selected) {
        self.clear_checkpoint(sel);
        sel.file_id = generate_file_id();
        sel.metadata = FileMetadata::not_uploaded(&sel.file_id, sel.source.len());
        sel.queue.clear();
        sel.registered = false;
    }

    fn set_state(&self, inner: &mut Inner, state: EngineState) {
        if inner.state == state {
            return;
        }
        debug!(from = %inner.state, to = %state, "state changed");
        inner.state = state;
        self.emit(EngineEvent::StateChanged(state));
    }

    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!(error = %e, "engine event dropped");
        }
    }
}

/// First state of a run: `initializing` if the upload must be registered.
fn initial_state(begin: &Option<(String, u64)>) -> EngineState {
    if begin.is_some() {
        EngineState::Initializing
    } else {
        EngineState::Uploading
    }
}

/// The outcome owed to a pause or cancel issued during the run.
fn interrupted(inner: &Inner) -> Option<UploadOutcome> {
    if inner.cancel_requested {
        return Some(UploadOutcome::Cancelled);
    }
    if inner.pause_requested {
        return Some(match inner.selected.as_ref() {
            Some(sel) => UploadOutcome::Paused(sel.metadata.clone()),
            None => UploadOutcome::Cancelled,
        });
    }
    None
}

async fn read_chunk(
    source: Arc<dyn ChunkSource>,
    range: ChunkRange,
) -> Result<Vec<u8>, TransferError> {
    tokio::task::spawn_blocking(move || source.read_range(range))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}
