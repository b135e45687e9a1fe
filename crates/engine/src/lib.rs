//! Resumable chunked upload engine.
//!
//! [`TransferEngine`] drives one file at a time through
//! `idle → initializing → uploading → completed`, with `paused` and `failed`
//! as resumable detours. Each chunk is retried under a [`RetryPolicy`],
//! progress is checkpointed to a [`TransferStore`], and
//! [`StatusReconciler`] folds the service's record back into local state.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod retry;
pub mod store;

// Re-export primary types for convenience.
pub use config::EngineConfig;
pub use engine::{TransferEngine, generate_file_id};
pub use error::EngineError;
pub use events::{EngineEvent, EngineState, Selection, TransferProgress, UploadOutcome};
pub use reconcile::{StatusReconciler, merge};
pub use retry::{RetryError, RetryPolicy, send_with_retry};
pub use store::{
    CredentialStore, JsonFileStore, MemoryStore, StoreError, TransferState, TransferStore,
    config_dir, default_state_dir, transfer_key,
};
