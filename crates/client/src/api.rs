//! The remote service contract consumed by the transfer engine.
//!
//! Implemented by [`HttpClient`](crate::HttpClient) for the real service and
//! by scripted mocks in tests, keeping engine logic decoupled from HTTP.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chunkup_protocol::{ChunkAck, FileMetadata};
use chunkup_transfer::ChunkRange;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::session::Credential;

/// Boxed future returned by [`UploadApi`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receives the cumulative number of bytes sent for the current chunk.
///
/// Values are non-decreasing within one call to
/// [`UploadApi::upload_chunk`].
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One chunk ready to be sent.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_id: String,
    /// Name the bytes are uploaded under.
    pub file_name: String,
    pub range: ChunkRange,
    pub total_bytes: u64,
    pub data: Bytes,
}

/// Remote upload service.
pub trait UploadApi: Send + Sync {
    /// Exchanges a username and password for a bearer credential.
    fn authenticate<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Credential, ClientError>>;

    /// Registers `(file_id, total_bytes)` before the first chunk.
    fn begin_transfer<'a>(
        &'a self,
        credential: &'a Credential,
        file_id: &'a str,
        total_bytes: u64,
    ) -> BoxFuture<'a, Result<FileMetadata, ClientError>>;

    /// Sends one chunk.
    ///
    /// Resolves to [`ClientError::Cancelled`] once `cancel` fires, after
    /// which the request has no further effect.
    fn upload_chunk<'a>(
        &'a self,
        credential: &'a Credential,
        chunk: ChunkUpload,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ChunkAck, ClientError>>;

    /// Fetches the service's record for `file_id`; `None` if it is unknown.
    fn query_status<'a>(
        &'a self,
        credential: &'a Credential,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<FileMetadata>, ClientError>>;

    /// Streams a completed file to `dest`, returning the final file size.
    fn fetch_file<'a>(
        &'a self,
        file_id: &'a str,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, ClientError>>;
}
