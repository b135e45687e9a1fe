//! Data types shared by the chunkup client, engine, and wire tests.
//!
//! Field names match the JSON bodies emitted by the upload service
//! (`snake_case`, byte counts as integers, RFC 3339 timestamps).

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{ChunkAck, ErrorBody, InitUploadResponse, LoginResponse, content_range};
pub use types::{FileMetadata, FileStatus};
