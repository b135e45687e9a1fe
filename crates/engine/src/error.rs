//! Engine error types.

use chunkup_client::{ClientError, InvalidatesSession};
use chunkup_protocol::FileStatus;
use chunkup_transfer::TransferError;

use crate::events::EngineState;

/// Errors produced by engine intents.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not logged in")]
    MissingCredentials,

    #[error("no file selected")]
    NoFileSelected,

    #[error("an upload is already running")]
    Busy,

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: EngineState,
    },

    #[error("failed to initialize upload: {0}")]
    Initialize(#[source] ClientError),

    #[error("chunk {start}-{end} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        start: u64,
        end: u64,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("session expired: {0}")]
    Unauthorized(String),

    #[error("file is not complete (status {status})")]
    NotComplete { status: FileStatus },

    #[error("queue drained at {received} of {total} bytes")]
    Incomplete { received: u64, total: u64 },

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}

impl EngineError {
    /// Returns `true` if the caller must replace its session with
    /// [`Session::Anonymous`](chunkup_client::Session::Anonymous).
    pub fn invalidates_session(&self) -> bool {
        match self {
            EngineError::Unauthorized(_) => true,
            EngineError::Client(e) | EngineError::Initialize(e) => e.is_unauthorized(),
            EngineError::RetriesExhausted { source, .. } => source.is_unauthorized(),
            _ => false,
        }
    }
}

impl InvalidatesSession for EngineError {
    fn invalidates_session(&self) -> bool {
        EngineError::invalidates_session(self)
    }
}
