//! Session handling and remote bindings for the chunkup upload service.
//!
//! [`UploadApi`] is the seam between the transfer engine and the network:
//! the engine only ever talks to `Arc<dyn UploadApi>`, and [`HttpClient`]
//! binds the five remote contracts to the service's HTTP endpoints.

pub mod api;
pub mod error;
pub mod http;
pub mod session;

// Re-export primary types for convenience.
pub use api::{BoxFuture, ChunkUpload, ProgressFn, UploadApi};
pub use error::ClientError;
pub use http::{ClientConfig, HttpClient};
pub use session::{Credential, InvalidatesSession, Session};
