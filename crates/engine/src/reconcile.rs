//! Status reconciliation against the service's record.

use std::sync::Arc;

use chunkup_client::{ClientError, Session, UploadApi};
use chunkup_protocol::FileMetadata;
use tracing::debug;

/// Fetches server-truth metadata for an upload target.
pub struct StatusReconciler {
    api: Arc<dyn UploadApi>,
}

impl StatusReconciler {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self { api }
    }

    /// Queries the service for `file_id`.
    ///
    /// A record whose byte counters show every byte received is reported as
    /// `complete` whatever status the service attached to it.
    ///
    /// An unknown id is not an error: it yields `not_uploaded` sized to the
    /// selected file, or `not_found` when `selected_size` is `None`. Without a
    /// credential no request is made and the result is `not_found`.
    pub async fn query(
        &self,
        session: &Session,
        file_id: &str,
        selected_size: Option<u64>,
    ) -> Result<FileMetadata, ClientError> {
        let Some(credential) = session.credential() else {
            debug!(file_id, "no session, skipping status query");
            return Ok(FileMetadata::not_found(file_id));
        };

        match self.api.query_status(credential, file_id).await? {
            Some(metadata) => Ok(metadata.settled()),
            None => {
                debug!(file_id, "service does not know this upload");
                Ok(match selected_size {
                    Some(total) => FileMetadata::not_uploaded(file_id, total),
                    None => FileMetadata::not_found(file_id),
                })
            }
        }
    }
}

/// Folds `remote` into `local`.
///
/// Outside a run the service record wins outright. While a run is active the
/// byte counters keep the larger value so local progress never moves back
/// under an in-flight chunk.
pub fn merge(local: &FileMetadata, remote: FileMetadata, active: bool) -> FileMetadata {
    if !active {
        return remote;
    }
    FileMetadata {
        received_bytes: local.received_bytes.max(remote.received_bytes),
        next_expected_byte: local.next_expected_byte.max(remote.next_expected_byte),
        ..remote
    }
}
