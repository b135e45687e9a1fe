use std::time::Duration;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Attempts per chunk before an upload run fails.
pub const MAX_RETRIES: u32 = 3;

/// Base unit of the linear retry backoff (`RETRY_DELAY * attempt`).
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Default service address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Form field carrying chunk bytes in an upload request.
pub const CHUNK_FIELD: &str = "chunk";

// Endpoint paths.
pub const LOGIN_PATH: &str = "/login";
pub const INIT_UPLOAD_PATH: &str = "/init_upload";
pub const UPLOAD_CHUNK_PATH: &str = "/upload_chunk";
pub const STATUS_PATH: &str = "/status";
pub const DOWNLOAD_PATH: &str = "/download";
