use serde::{Deserialize, Serialize};

use crate::types::FileMetadata;

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// Body of a successful `POST /login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

/// Body of a successful `POST /init_upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadResponse {
    #[serde(default)]
    pub message: String,
    pub file_id: String,
    pub metadata: FileMetadata,
}

/// Body of a successful `POST /upload_chunk`.
///
/// A re-sent range the service already holds is answered with only
/// `message` and `next_expected_byte`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAck {
    #[serde(default)]
    pub message: String,
    pub next_expected_byte: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

impl ChunkAck {
    /// Returns `true` if the service reported the range as a duplicate.
    pub fn is_duplicate(&self) -> bool {
        self.received_bytes.is_none()
    }
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Parses an error body, tolerating empty or non-JSON payloads.
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// Human-readable text: `error`, then `message`, then `fallback`.
    pub fn describe(&self, fallback: &str) -> String {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Formats the `Content-Range` value for the half-open range `[start, end)`.
///
/// The header uses an inclusive last byte: `bytes 0-1048575/2500000`.
pub fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", start, end.saturating_sub(1), total)
}
