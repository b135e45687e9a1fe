//! Engine state and the typed event stream consumed by presentation layers.

use std::fmt;
use std::time::Duration;

use chunkup_protocol::FileMetadata;
use chunkup_transfer::ChunkRange;

/// Lifecycle of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Idle,
    /// Registering the upload with the service.
    Initializing,
    Uploading,
    Paused,
    Completed,
    Failed,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Initializing => "initializing",
            EngineState::Uploading => "uploading",
            EngineState::Paused => "paused",
            EngineState::Completed => "completed",
            EngineState::Failed => "failed",
        }
    }

    /// `initializing` or `uploading`.
    pub fn is_active(self) -> bool {
        matches!(self, EngineState::Initializing | EngineState::Uploading)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of selecting a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// No checkpoint; a new upload target was created.
    Fresh(FileMetadata),
    /// A `partial` checkpoint exists; starting continues from it.
    ResumeAvailable(FileMetadata),
}

impl Selection {
    pub fn metadata(&self) -> &FileMetadata {
        match self {
            Selection::Fresh(m) | Selection::ResumeAvailable(m) => m,
        }
    }
}

/// How an upload run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed(FileMetadata),
    Paused(FileMetadata),
    Cancelled,
}

/// Snapshot of byte-level progress within the current run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// Bytes of the file handed to the transport so far.
    pub sent_bytes: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    /// `None` until a speed is known.
    pub eta: Option<Duration>,
}

impl TransferProgress {
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.sent_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    /// Byte-level progress of the in-flight chunk, file-relative.
    Progress {
        sent_bytes: u64,
        total_bytes: u64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    /// The service accepted a chunk.
    ChunkAcknowledged { range: ChunkRange, duplicate: bool },
    /// A queued chunk was already below `next_expected_byte`.
    ChunkSkipped { range: ChunkRange },
    /// A chunk send failed and will be retried after `delay`.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    },
    MetadataUpdated(FileMetadata),
    Failed { error: String },
    /// The credential was rejected; the caller must drop its session.
    SessionInvalidated,
    Completed(FileMetadata),
}
