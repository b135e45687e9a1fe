use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side state of an upload target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "not_uploaded")]
    NotUploaded,
}

impl FileStatus {
    /// Returns `true` for `complete`, the only terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Complete)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Complete => "complete",
            FileStatus::Partial => "partial",
            FileStatus::Pending => "pending",
            FileStatus::NotFound => "not_found",
            FileStatus::NotUploaded => "not_uploaded",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record for one upload target.
///
/// The service is authoritative; the client mirrors it locally and advances
/// it after every acknowledged chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub status: FileStatus,
    pub received_bytes: u64,
    pub total_bytes: u64,
    pub next_expected_byte: u64,
    /// Content fingerprint; `0` means not yet computed.
    #[serde(default)]
    pub checksum: i64,
    pub last_updated: DateTime<Utc>,
}

impl FileMetadata {
    /// A freshly selected file that the service has never seen.
    pub fn not_uploaded(file_id: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            file_id: file_id.into(),
            status: FileStatus::NotUploaded,
            received_bytes: 0,
            total_bytes,
            next_expected_byte: 0,
            checksum: 0,
            last_updated: Utc::now(),
        }
    }

    /// A placeholder for an id the service does not know, with no file selected.
    pub fn not_found(file_id: impl Into<String>) -> Self {
        Self {
            status: FileStatus::NotFound,
            ..Self::not_uploaded(file_id, 0)
        }
    }

    /// The server's checksum, if it has computed one.
    pub fn checksum(&self) -> Option<i64> {
        (self.checksum != 0).then_some(self.checksum)
    }

    /// Bytes still to be sent.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.received_bytes)
    }

    /// Upload progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.received_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Checks `received_bytes <= total_bytes` and
    /// `next_expected_byte <= total_bytes`.
    pub fn is_consistent(&self) -> bool {
        self.received_bytes <= self.total_bytes && self.next_expected_byte <= self.total_bytes
    }

    /// Stamps `last_updated` with the current time.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Returns `true` once every byte of a non-empty file has been received.
    pub fn is_fully_received(&self) -> bool {
        self.total_bytes > 0 && self.received_bytes >= self.total_bytes
    }

    /// Promotes a fully received `partial` or `pending` record to `complete`.
    ///
    /// The service's status endpoint keeps answering `partial` after the last
    /// chunk lands; the byte counters are what mark the upload finished.
    pub fn settled(mut self) -> Self {
        if self.is_fully_received()
            && matches!(self.status, FileStatus::Partial | FileStatus::Pending)
        {
            self.status = FileStatus::Complete;
        }
        self
    }
}
