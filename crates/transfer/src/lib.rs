//! Chunk planning, chunk sources, and throughput estimation.
//!
//! A file is split into an ordered partition of half-open byte ranges
//! ([`plan_chunks`]); each range is read from a [`ChunkSource`] right before
//! it is sent, and [`SpeedCalculator`] turns per-chunk progress into a
//! bytes-per-second estimate.

mod chunked;
mod progress;
mod types;

pub use chunked::{ChunkSource, FileSource, MemorySource, pending_chunks, plan_chunks};
pub use progress::{SpeedCalculator, format_eta, format_size, format_speed};
pub use types::ChunkRange;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("range {start}-{end} is outside a {len}-byte source")]
    OutOfBounds { start: u64, end: u64, len: u64 },
}
